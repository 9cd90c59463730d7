//! Table configuration
//!
//! A table's configuration is fixed the first time the table is created and
//! persisted in its metadata file. Later opens either adopt the persisted
//! configuration or must supply an identical one.
//!
//! ```toml
//! [tables.events]
//! id_generator = "bigint"
//! id_type = "integer"
//!
//! [tables.events.sharding]
//! key = "id"
//! key_type = "integer"
//! intervals = { base = 0, width = 1000 }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::IdType;

/// Configuration of one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Tag of the id generator; `None` picks one from the database strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_generator: Option<String>,

    /// Id representation used when the table is opened without an explicit type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_type: Option<IdType>,

    /// Range sharding policy; `None` stores the table in a single file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharding: Option<ShardsetConfig>,

    /// Free-form options carried alongside the table
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl TableConfig {
    pub fn with_id_generator(mut self, tag: impl Into<String>) -> Self {
        self.id_generator = Some(tag.into());
        self
    }

    pub fn with_id_type(mut self, id_type: IdType) -> Self {
        self.id_type = Some(id_type);
        self
    }

    pub fn sharded(mut self, sharding: ShardsetConfig) -> Self {
        self.sharding = Some(sharding);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn is_sharded(&self) -> bool {
        self.sharding.is_some()
    }
}

/// How a table is split into partition files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardsetConfig {
    /// Where the sharding key is read from
    pub key: ShardKey,
    /// Type the key is interpreted as; must be `integer` or `long`
    pub key_type: IdType,
    /// Partitioning function
    pub intervals: IntervalProvider,
}

impl ShardsetConfig {
    pub fn by(key: ShardKey, key_type: IdType, intervals: IntervalProvider) -> Self {
        Self {
            key,
            key_type,
            intervals,
        }
    }

    /// Shard on the row id
    pub fn by_id(key_type: IdType, intervals: IntervalProvider) -> Self {
        Self::by(ShardKey::Id, key_type, intervals)
    }
}

/// Location of a row's sharding key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKey {
    /// The row id, decoded through the table's id generator
    Id,
    /// A JSON pointer into the row document, e.g. `/created/year`
    Field(String),
}

/// Fixed-width numeric buckets `[base + k * width, base + (k + 1) * width)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalProvider {
    pub base: i64,
    pub width: i64,
}

impl IntervalProvider {
    /// Buckets of `width` aligned on `base`
    ///
    /// # Panics
    ///
    /// Panics if `width` is not positive.
    pub fn new(base: i64, width: i64) -> Self {
        assert!(width > 0, "interval width must be positive");
        Self { base, width }
    }

    /// Whether this provider can be used at all
    pub fn is_valid(&self) -> bool {
        self.width > 0
    }

    /// Lower bound of the interval containing `key`
    ///
    /// Saturates at the ends of the `i64` range.
    pub fn lower_bound(&self, key: i64) -> i64 {
        let offset = i128::from(key) - i128::from(self.base);
        let bucket = offset.div_euclid(i128::from(self.width));
        let lower = i128::from(self.base) + bucket * i128::from(self.width);
        lower.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// Exclusive upper bound of the interval starting at `lower`
    pub fn upper_bound(&self, lower: i64) -> i64 {
        lower.saturating_add(self.width)
    }

    /// Whether `lower` is the start of one of this provider's intervals
    pub fn is_aligned(&self, lower: i64) -> bool {
        self.lower_bound(lower) == lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_bound_with_offset_base() {
        let provider = IntervalProvider::new(2, 100);
        assert_eq!(provider.lower_bound(1), -98);
        assert_eq!(provider.lower_bound(2), 2);
        assert_eq!(provider.lower_bound(3), 2);
        assert_eq!(provider.lower_bound(101), 2);
        assert_eq!(provider.lower_bound(102), 102);
        assert_eq!(provider.lower_bound(-98), -98);
        assert_eq!(provider.lower_bound(-99), -198);
    }

    #[test]
    fn test_bounds_saturate() {
        let provider = IntervalProvider::new(0, 1000);
        assert_eq!(provider.upper_bound(i64::MAX - 10), i64::MAX);
        assert!(provider.lower_bound(i64::MIN) <= i64::MIN + 1000);
    }

    #[test]
    fn test_alignment() {
        let provider = IntervalProvider::new(2, 100);
        assert!(provider.is_aligned(-98));
        assert!(provider.is_aligned(202));
        assert!(!provider.is_aligned(0));
    }

    #[test]
    #[should_panic(expected = "interval width must be positive")]
    fn test_zero_width_panics() {
        IntervalProvider::new(0, 0);
    }

    #[test]
    fn test_toml_round_trip() {
        let toml = r#"
            id_generator = "bigint"
            id_type = "integer"

            [sharding]
            key = "id"
            key_type = "integer"
            intervals = { base = 2, width = 100 }
        "#;

        let config: TableConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config,
            TableConfig::default()
                .with_id_generator("bigint")
                .with_id_type(IdType::Integer)
                .sharded(ShardsetConfig::by_id(
                    IdType::Integer,
                    IntervalProvider::new(2, 100)
                ))
        );

        let json = serde_json::to_value(&config).unwrap();
        let back: TableConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_field_key_serialization() {
        let key = ShardKey::Field("/year".into());
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, serde_json::json!({ "field": "/year" }));
        assert_eq!(serde_json::from_value::<ShardKey>(json).unwrap(), key);
    }
}
