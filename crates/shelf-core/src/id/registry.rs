//! Generator registry
//!
//! Maps the tag stored in table metadata to a constructor. The registry is
//! populated once at database start; a tag that is not registered is an
//! explicit [`IdError::UnknownGenerator`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{
    bigint, random, timestamp, BigIntIdGenerator, IdError, IdGenerator, IdType,
    TimestampIdGenerator, UuidIdGenerator,
};

/// Builds a fresh generator instance
pub type GeneratorConstructor = Arc<dyn Fn() -> Arc<dyn IdGenerator> + Send + Sync>;

/// Default order in which generators are tried for a new table
pub const DEFAULT_STRATEGY: &[&str] = &[random::TAG, timestamp::TAG, bigint::TAG];

/// Registry of id generator constructors keyed by tag
#[derive(Clone)]
pub struct GeneratorRegistry {
    constructors: HashMap<String, GeneratorConstructor>,
}

impl GeneratorRegistry {
    /// A registry with no generators at all
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry holding the built-in `uuid`, `timestamp` and `bigint` generators
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(random::TAG, || Arc::new(UuidIdGenerator));
        registry.register(timestamp::TAG, || Arc::new(TimestampIdGenerator::new()));
        registry.register(bigint::TAG, || Arc::new(BigIntIdGenerator::new()));
        registry
    }

    /// Register a constructor, replacing any previous one with the same tag
    pub fn register<F>(&mut self, tag: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn IdGenerator> + Send + Sync + 'static,
    {
        self.constructors.insert(tag.into(), Arc::new(constructor));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags in sorted order
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Build a new generator for `tag`
    pub fn create(&self, tag: &str) -> Result<Arc<dyn IdGenerator>, IdError> {
        self.constructors
            .get(tag)
            .map(|constructor| constructor())
            .ok_or_else(|| IdError::UnknownGenerator(tag.to_string()))
    }

    /// Walk `strategy` in order and return the first generator supporting `id_type`
    ///
    /// Returns `Ok(None)` when every candidate rejects the type. Unknown tags
    /// in the strategy are an error rather than being skipped.
    pub fn select<S: AsRef<str>>(
        &self,
        strategy: &[S],
        id_type: IdType,
    ) -> Result<Option<Arc<dyn IdGenerator>>, IdError> {
        for tag in strategy {
            let generator = self.create(tag.as_ref())?;
            if generator.supports(id_type) {
                return Ok(Some(generator));
            }
        }
        Ok(None)
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = GeneratorRegistry::with_defaults();
        assert_eq!(registry.tags(), vec!["bigint", "timestamp", "uuid"]);
    }

    #[test]
    fn test_create_builds_independent_instances() {
        let registry = GeneratorRegistry::with_defaults();
        let a = registry.create("bigint").unwrap();
        let b = registry.create("bigint").unwrap();

        a.generate_new_id(IdType::Long).unwrap();
        assert_eq!(b.generate_new_id(IdType::Long).unwrap().as_i64(), Some(1));
    }

    #[test]
    fn test_unknown_tag() {
        let registry = GeneratorRegistry::with_defaults();
        assert_eq!(
            registry.create("snowflake").unwrap_err(),
            IdError::UnknownGenerator("snowflake".into())
        );
    }

    #[test]
    fn test_select_follows_strategy_order() {
        let registry = GeneratorRegistry::with_defaults();

        let string_gen = registry.select(DEFAULT_STRATEGY, IdType::String).unwrap();
        assert_eq!(string_gen.unwrap().tag(), "uuid");

        let long_gen = registry.select(DEFAULT_STRATEGY, IdType::Long).unwrap();
        assert_eq!(long_gen.unwrap().tag(), "timestamp");

        let int_gen = registry.select(DEFAULT_STRATEGY, IdType::Integer).unwrap();
        assert_eq!(int_gen.unwrap().tag(), "bigint");
    }

    #[test]
    fn test_select_none_supports() {
        let registry = GeneratorRegistry::with_defaults();
        let picked = registry.select(&["uuid"], IdType::Integer).unwrap();
        assert!(picked.is_none());
    }

    #[test]
    fn test_custom_generator() {
        let mut registry = GeneratorRegistry::empty();
        registry.register("counter", || Arc::new(BigIntIdGenerator::new()));

        assert!(registry.contains("counter"));
        assert!(!registry.contains("uuid"));
        assert!(registry.select(&["counter"], IdType::Long).unwrap().is_some());
    }
}
