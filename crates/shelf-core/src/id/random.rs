//! Random UUID identifiers

use serde_json::{Map, Value};
use uuid::Uuid;

use super::{IdError, IdGenerator, IdType, IdValue};

/// Tag recorded in table metadata
pub const TAG: &str = "uuid";

/// Issues random v4 UUIDs; keeps no state
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn supports(&self, id_type: IdType) -> bool {
        matches!(id_type, IdType::String | IdType::Uuid)
    }

    fn generate_new_id(&self, id_type: IdType) -> Result<IdValue, IdError> {
        let id = Uuid::new_v4();
        match id_type {
            IdType::Uuid => Ok(IdValue::Uuid(id)),
            IdType::String => Ok(IdValue::String(id.to_string())),
            other => Err(self.unsupported(other)),
        }
    }

    fn id_to_string(&self, id: &IdValue) -> Result<String, IdError> {
        match id {
            IdValue::String(s) => Ok(s.clone()),
            IdValue::Uuid(u) => Ok(u.to_string()),
            other => Err(self.unsupported(other.id_type())),
        }
    }

    fn string_to_id(&self, id: &str, id_type: IdType) -> Result<IdValue, IdError> {
        match id_type {
            IdType::String => Ok(IdValue::String(id.to_string())),
            IdType::Uuid => Uuid::parse_str(id)
                .map(IdValue::Uuid)
                .map_err(|e| IdError::Malformed {
                    value: id.to_string(),
                    id_type,
                    details: e.to_string(),
                }),
            other => Err(self.unsupported(other)),
        }
    }

    fn save_state(&self, _state: &mut Map<String, Value>) {}

    fn load_state(&self, _state: &Map<String, Value>) -> Result<(), IdError> {
        Ok(())
    }
}
