//! Table error handling
//!
//! Corruption in regenerable bookkeeping (the metadata file) never reaches
//! this type: it is logged and repaired where it is found. Everything that
//! would let a table run with an inconsistent idea of its id typing or
//! sharding policy is an error here and fails the operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::id::{IdError, IdType};
use crate::storage::StorageError;

/// Errors raised by tables, engines and the metadata factory
#[derive(Error, Debug)]
pub enum TableError {
    /// Supplied configuration disagrees with what the table was created with
    #[error("Configuration conflict on table '{table}': {details}")]
    ConfigurationConflict { table: String, details: String },

    /// The id generator could not be resolved or chosen
    #[error("Cannot resolve id generator for table '{table}': {details}")]
    GeneratorResolution { table: String, details: String },

    /// An id generator was asked for a type outside its supported set
    #[error("Id generator '{generator}' does not support id type {id_type}")]
    UnsupportedIdType { generator: String, id_type: IdType },

    /// Any other id generation or conversion failure
    #[error("Id error: {0}")]
    Id(IdError),

    /// A row with this id already exists
    #[error("Table '{table}' already contains a row with id '{id}'")]
    DuplicateKey { table: String, id: String },

    /// No row with this id exists
    #[error("Table '{table}' has no row with id '{id}'")]
    KeyNotFound { table: String, id: String },

    /// The sharding key of a row is missing or not an integer
    #[error("Row '{id}' in table '{table}' has no usable sharding key: {details}")]
    InvalidShardKey {
        table: String,
        id: String,
        details: String,
    },

    /// A partition file name does not fit the table's sharding policy
    #[error("Partition '{name}' of table '{table}' is invalid: {details}")]
    InvalidPartition {
        table: String,
        name: String,
        details: String,
    },

    /// The table name cannot be used as a file name
    #[error("Invalid table name '{name}': {details}")]
    InvalidTableName { name: String, details: String },

    /// The operation arrived after shutdown began
    #[error("Table '{table}' has been shut down")]
    ShutDown { table: String },

    /// The database was used after shutdown began
    #[error("Database at '{path}' has been shut down")]
    DatabaseShutDown { path: PathBuf },

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<IdError> for TableError {
    fn from(error: IdError) -> Self {
        match error {
            IdError::UnsupportedType { generator, id_type } => {
                TableError::UnsupportedIdType { generator, id_type }
            }
            other => TableError::Id(other),
        }
    }
}

impl TableError {
    /// Whether the error reflects a configuration problem rather than a
    /// transient or data-level failure
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TableError::ConfigurationConflict { .. }
                | TableError::GeneratorResolution { .. }
                | TableError::UnsupportedIdType { .. }
                | TableError::InvalidPartition { .. }
                | TableError::InvalidTableName { .. }
        )
    }

    /// What the user can do about the error, when anything
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            TableError::Storage(e) => e.recovery_suggestion(),
            TableError::ConfigurationConflict { .. } => Some(
                "Make the config file agree with the table's persisted configuration, or use a new table name.",
            ),
            TableError::GeneratorResolution { .. } => {
                Some("Register the table's custom id generator before opening it.")
            }
            TableError::InvalidTableName { .. } => Some(
                "Table names may not be empty, start with '.', contain path separators or end in '.json' or '.tmp'.",
            ),
            _ => None,
        }
    }
}

/// Result type for table operations
pub type TableResult<T> = Result<T, TableError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_type_is_lifted() {
        let err: TableError = IdError::UnsupportedType {
            generator: "uuid".into(),
            id_type: IdType::Long,
        }
        .into();

        assert!(matches!(
            err,
            TableError::UnsupportedIdType {
                id_type: IdType::Long,
                ..
            }
        ));
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("uuid"));
    }

    #[test]
    fn test_other_id_errors_are_wrapped() {
        let err: TableError = IdError::UnknownGenerator("snowflake".into()).into();
        assert!(matches!(err, TableError::Id(IdError::UnknownGenerator(_))));
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_storage_errors_are_transparent() {
        let err: TableError = StorageError::NotFound {
            path: "/data/t.json".into(),
        }
        .into();
        assert_eq!(err.to_string(), "File not found: '/data/t.json'");
    }

    #[test]
    fn test_recovery_suggestion_delegates_to_storage() {
        let err: TableError = StorageError::from_io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/data/t.json".into(),
        )
        .into();
        assert!(err
            .recovery_suggestion()
            .is_some_and(|hint| hint.contains("permissions")));

        let err = TableError::KeyNotFound {
            table: "t".into(),
            id: "7".into(),
        };
        assert!(err.recovery_suggestion().is_none());
    }
}
