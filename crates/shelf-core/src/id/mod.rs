//! Identifier generation
//!
//! Every table binds exactly one [`IdGenerator`] at creation time. The
//! generator is recorded in the table metadata by its tag, so a restart
//! rebuilds the same strategy and restores its recovery state.
//!
//! ## Strategies
//!
//! - `timestamp`: millisecond timestamps, strictly increasing
//! - `bigint`: a monotonically increasing integer counter
//! - `uuid`: random v4 UUIDs, stateless
//!
//! Custom strategies are added to a [`GeneratorRegistry`] under their own tag.
//!
//! Rows are stored under the string form of their id, so every generator
//! also converts between its typed values and strings. For any generated
//! value `x`, `string_to_id(id_to_string(x)) == x`.

mod bigint;
mod random;
mod registry;
mod timestamp;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use self::bigint::BigIntIdGenerator;
pub use self::random::UuidIdGenerator;
pub use self::registry::{GeneratorConstructor, GeneratorRegistry, DEFAULT_STRATEGY};
pub use self::timestamp::TimestampIdGenerator;

/// The representation an application uses for a table's row ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    String,
    Integer,
    Long,
    Date,
    Uuid,
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdType::String => "string",
            IdType::Integer => "integer",
            IdType::Long => "long",
            IdType::Date => "date",
            IdType::Uuid => "uuid",
        };
        f.pad(name)
    }
}

/// A typed identifier value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdValue {
    String(String),
    Integer(i32),
    Long(i64),
    Date(DateTime<Utc>),
    Uuid(uuid::Uuid),
}

impl IdValue {
    /// The type this value is an instance of
    pub fn id_type(&self) -> IdType {
        match self {
            IdValue::String(_) => IdType::String,
            IdValue::Integer(_) => IdType::Integer,
            IdValue::Long(_) => IdType::Long,
            IdValue::Date(_) => IdType::Date,
            IdValue::Uuid(_) => IdType::Uuid,
        }
    }

    /// Render the value as a JSON value for query comparisons
    ///
    /// Numbers stay numbers; dates become RFC 3339 strings.
    pub fn to_json(&self) -> Value {
        match self {
            IdValue::String(s) => Value::String(s.clone()),
            IdValue::Integer(i) => Value::from(*i),
            IdValue::Long(l) => Value::from(*l),
            IdValue::Date(d) => Value::String(format_date(d)),
            IdValue::Uuid(u) => Value::String(u.to_string()),
        }
    }

    /// The value as a signed integer, if it is numeric
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IdValue::Integer(i) => Some(i64::from(*i)),
            IdValue::Long(l) => Some(*l),
            IdValue::Date(d) => Some(d.timestamp_millis()),
            _ => None,
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::String(s) => f.write_str(s),
            IdValue::Integer(i) => write!(f, "{}", i),
            IdValue::Long(l) => write!(f, "{}", l),
            IdValue::Date(d) => f.write_str(&format_date(d)),
            IdValue::Uuid(u) => write!(f, "{}", u),
        }
    }
}

/// Errors raised by identifier generators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdError {
    /// The generator cannot produce or convert this type
    #[error("Id generator '{generator}' does not support id type {id_type}")]
    UnsupportedType { generator: String, id_type: IdType },

    /// No generator is registered under this tag
    #[error("Unknown id generator '{0}'")]
    UnknownGenerator(String),

    /// A string could not be parsed as an id of the requested type
    #[error("Malformed {id_type} id '{value}': {details}")]
    Malformed {
        value: String,
        id_type: IdType,
        details: String,
    },

    /// Persisted generator state could not be restored
    #[error("Malformed state for id generator '{generator}': {details}")]
    MalformedState { generator: String, details: String },

    /// The generator ran out of values for the requested type
    #[error("Id generator '{generator}' exhausted the {id_type} range")]
    Exhausted { generator: String, id_type: IdType },
}

/// A strategy producing unique, typed identifiers
///
/// Implementations must be safe to call from many threads at once and must
/// never block on allocation.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Stable tag recorded in table metadata
    fn tag(&self) -> &str;

    /// Whether this generator can produce ids of the given type
    fn supports(&self, id_type: IdType) -> bool;

    /// Allocate a new id, converted to `id_type`
    fn generate_new_id(&self, id_type: IdType) -> Result<IdValue, IdError>;

    /// Convert an id to the string form rows are stored under
    fn id_to_string(&self, id: &IdValue) -> Result<String, IdError>;

    /// Parse a stored id string back into `id_type`
    fn string_to_id(&self, id: &str, id_type: IdType) -> Result<IdValue, IdError>;

    /// Write recovery state as attributes of the generator section
    fn save_state(&self, state: &mut Map<String, Value>);

    /// Restore recovery state written by [`IdGenerator::save_state`]
    fn load_state(&self, state: &Map<String, Value>) -> Result<(), IdError>;

    /// Build the error for a type outside the supported set
    fn unsupported(&self, id_type: IdType) -> IdError {
        IdError::UnsupportedType {
            generator: self.tag().to_string(),
            id_type,
        }
    }
}

/// A generator bound to the id type of one table
///
/// Engines use this to turn stored id strings back into typed keys, e.g. to
/// compute the sharding key of a row keyed by id.
#[derive(Debug, Clone)]
pub struct IdCodec {
    generator: Arc<dyn IdGenerator>,
    id_type: IdType,
}

impl IdCodec {
    /// Bind a generator to an id type, failing if the type is unsupported
    pub fn new(generator: Arc<dyn IdGenerator>, id_type: IdType) -> Result<Self, IdError> {
        if !generator.supports(id_type) {
            return Err(generator.unsupported(id_type));
        }
        Ok(Self { generator, id_type })
    }

    pub fn generator(&self) -> &Arc<dyn IdGenerator> {
        &self.generator
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Allocate a new id, returning it together with its stored form
    pub fn generate(&self) -> Result<(IdValue, String), IdError> {
        let id = self.generator.generate_new_id(self.id_type)?;
        let encoded = self.generator.id_to_string(&id)?;
        Ok((id, encoded))
    }

    /// Convert an id to its stored form
    pub fn encode(&self, id: &IdValue) -> Result<String, IdError> {
        self.generator.id_to_string(id)
    }

    /// Parse a stored id as the table's id type
    pub fn decode(&self, id: &str) -> Result<IdValue, IdError> {
        self.generator.string_to_id(id, self.id_type)
    }

    /// Parse a stored id as some other supported type
    pub fn decode_as(&self, id: &str, id_type: IdType) -> Result<IdValue, IdError> {
        self.generator.string_to_id(id, id_type)
    }
}

/// Canonical string form of a date id
pub(crate) fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse the canonical string form of a date id
pub(crate) fn parse_date(value: &str) -> Result<DateTime<Utc>, IdError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| IdError::Malformed {
            value: value.to_string(),
            id_type: IdType::Date,
            details: e.to_string(),
        })
}

/// Read the `maxId` attribute shared by the counter-style generators
pub(crate) fn read_max_id(generator: &str, state: &Map<String, Value>) -> Result<i64, IdError> {
    let raw = state
        .get(MAX_ID_ATTRIBUTE)
        .and_then(Value::as_str)
        .ok_or_else(|| IdError::MalformedState {
            generator: generator.to_string(),
            details: format!("missing '{}' attribute", MAX_ID_ATTRIBUTE),
        })?;

    raw.parse::<i64>().map_err(|e| IdError::MalformedState {
        generator: generator.to_string(),
        details: format!("'{}' is not an integer: {}", raw, e),
    })
}

/// State attribute holding the last issued value
pub(crate) const MAX_ID_ATTRIBUTE: &str = "maxId";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_type_display_matches_serde_name() {
        for ty in [
            IdType::String,
            IdType::Integer,
            IdType::Long,
            IdType::Date,
            IdType::Uuid,
        ] {
            let json = serde_json::to_value(ty).unwrap();
            assert_eq!(json.as_str().unwrap(), ty.to_string());
        }
    }

    #[test]
    fn test_codec_rejects_unsupported_type() {
        let generator: Arc<dyn IdGenerator> = Arc::new(UuidIdGenerator);
        let err = IdCodec::new(generator, IdType::Long).unwrap_err();
        assert!(matches!(
            err,
            IdError::UnsupportedType {
                id_type: IdType::Long,
                ..
            }
        ));
    }

    #[test]
    fn test_codec_generate_returns_stored_form() {
        let generator: Arc<dyn IdGenerator> = Arc::new(BigIntIdGenerator::default());
        let codec = IdCodec::new(generator, IdType::Integer).unwrap();

        let (id, stored) = codec.generate().unwrap();
        assert_eq!(id, IdValue::Integer(1));
        assert_eq!(stored, "1");
        assert_eq!(codec.decode(&stored).unwrap(), id);
        assert_eq!(
            codec.decode_as(&stored, IdType::Long).unwrap(),
            IdValue::Long(1)
        );
    }

    #[test]
    fn test_value_as_i64() {
        assert_eq!(IdValue::Integer(-4).as_i64(), Some(-4));
        assert_eq!(IdValue::Long(9).as_i64(), Some(9));
        assert_eq!(IdValue::String("9".into()).as_i64(), None);
    }

    #[test]
    fn test_read_max_id_missing_attribute() {
        let err = read_max_id("bigint", &Map::new()).unwrap_err();
        assert!(matches!(err, IdError::MalformedState { .. }));
    }
}
