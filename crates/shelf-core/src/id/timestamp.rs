//! Timestamp identifiers
//!
//! Ids are wall-clock milliseconds. When two allocations land in the same
//! millisecond the later one is pushed to `last + 1`, so ids stay unique and
//! strictly increasing at the cost of drifting ahead of the clock. Do not use
//! this generator for tables that insert more than ~1000 rows per second.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{format_date, parse_date, read_max_id, IdError, IdGenerator, IdType, IdValue};

/// Tag recorded in table metadata
pub const TAG: &str = "timestamp";

/// Generates strictly increasing millisecond timestamps
#[derive(Debug, Default)]
pub struct TimestampIdGenerator {
    last: AtomicI64,
}

impl TimestampIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last issued value, in milliseconds since the epoch
    pub fn last_issued(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }

    /// Claim the next millisecond value
    fn next_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = if now <= last { last + 1 } else { now };
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    fn to_date(&self, millis: i64) -> Result<DateTime<Utc>, IdError> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| IdError::Exhausted {
            generator: TAG.to_string(),
            id_type: IdType::Date,
        })
    }
}

impl IdGenerator for TimestampIdGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn supports(&self, id_type: IdType) -> bool {
        matches!(id_type, IdType::String | IdType::Long | IdType::Date)
    }

    fn generate_new_id(&self, id_type: IdType) -> Result<IdValue, IdError> {
        if !self.supports(id_type) {
            return Err(self.unsupported(id_type));
        }

        let millis = self.next_millis();
        match id_type {
            IdType::Long => Ok(IdValue::Long(millis)),
            IdType::Date => Ok(IdValue::Date(self.to_date(millis)?)),
            IdType::String => Ok(IdValue::String(format_date(&self.to_date(millis)?))),
            other => Err(self.unsupported(other)),
        }
    }

    fn id_to_string(&self, id: &IdValue) -> Result<String, IdError> {
        match id {
            IdValue::String(s) => Ok(s.clone()),
            IdValue::Date(d) => Ok(format_date(d)),
            IdValue::Long(millis) => Ok(format_date(&self.to_date(*millis)?)),
            other => Err(self.unsupported(other.id_type())),
        }
    }

    fn string_to_id(&self, id: &str, id_type: IdType) -> Result<IdValue, IdError> {
        match id_type {
            IdType::String => Ok(IdValue::String(id.to_string())),
            IdType::Date => Ok(IdValue::Date(parse_date(id)?)),
            IdType::Long => Ok(IdValue::Long(parse_date(id)?.timestamp_millis())),
            other => Err(self.unsupported(other)),
        }
    }

    fn save_state(&self, state: &mut Map<String, Value>) {
        state.insert(
            super::MAX_ID_ATTRIBUTE.to_string(),
            Value::String(self.last_issued().to_string()),
        );
    }

    fn load_state(&self, state: &Map<String, Value>) -> Result<(), IdError> {
        let max_id = read_max_id(TAG, state)?;
        self.last.store(max_id, Ordering::Release);
        Ok(())
    }
}
