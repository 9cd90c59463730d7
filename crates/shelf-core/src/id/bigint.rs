//! Integer counter identifiers

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{Map, Value};

use super::{read_max_id, IdError, IdGenerator, IdType, IdValue};

/// Tag recorded in table metadata
pub const TAG: &str = "bigint";

/// Issues 1, 2, 3, ... from a single atomic counter
///
/// Integer ids fail with [`IdError::Exhausted`] once the counter passes
/// `i32::MAX`; long and string ids keep counting.
#[derive(Debug, Default)]
pub struct BigIntIdGenerator {
    last: AtomicI64,
}

impl BigIntIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_issued(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }

    fn next(&self, id_type: IdType) -> Result<i64, IdError> {
        let ceiling = match id_type {
            IdType::Integer => i64::from(i32::MAX),
            _ => i64::MAX,
        };

        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                last.checked_add(1).filter(|next| *next <= ceiling)
            })
            .map(|previous| previous + 1)
            .map_err(|_| IdError::Exhausted {
                generator: TAG.to_string(),
                id_type,
            })
    }

    fn malformed(id: &str, id_type: IdType, details: impl ToString) -> IdError {
        IdError::Malformed {
            value: id.to_string(),
            id_type,
            details: details.to_string(),
        }
    }
}

impl IdGenerator for BigIntIdGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn supports(&self, id_type: IdType) -> bool {
        matches!(id_type, IdType::String | IdType::Integer | IdType::Long)
    }

    fn generate_new_id(&self, id_type: IdType) -> Result<IdValue, IdError> {
        if !self.supports(id_type) {
            return Err(self.unsupported(id_type));
        }

        let value = self.next(id_type)?;
        match id_type {
            IdType::Integer => i32::try_from(value)
                .map(IdValue::Integer)
                .map_err(|_| IdError::Exhausted {
                    generator: TAG.to_string(),
                    id_type,
                }),
            IdType::Long => Ok(IdValue::Long(value)),
            IdType::String => Ok(IdValue::String(value.to_string())),
            other => Err(self.unsupported(other)),
        }
    }

    fn id_to_string(&self, id: &IdValue) -> Result<String, IdError> {
        match id {
            IdValue::String(s) => Ok(s.clone()),
            IdValue::Integer(i) => Ok(i.to_string()),
            IdValue::Long(l) => Ok(l.to_string()),
            other => Err(self.unsupported(other.id_type())),
        }
    }

    fn string_to_id(&self, id: &str, id_type: IdType) -> Result<IdValue, IdError> {
        match id_type {
            IdType::String => Ok(IdValue::String(id.to_string())),
            IdType::Integer => id
                .parse::<i32>()
                .map(IdValue::Integer)
                .map_err(|e| Self::malformed(id, id_type, e)),
            IdType::Long => id
                .parse::<i64>()
                .map(IdValue::Long)
                .map_err(|e| Self::malformed(id, id_type, e)),
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
