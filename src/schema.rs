//! Class schema, property definitions and shard assignment
//!
//! The schema manager that owns these definitions is an external
//! collaborator: an [`Index`](crate::Index) consumes a [`ClassSchema`] and a
//! [`ShardingState`] at construction time and never computes either itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Scalar property types understood by the property index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Text,
    Int,
    Number,
    Boolean,
    Date,
    Uuid,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Int => "int",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Uuid => "uuid",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(DataType::Text),
            "int" => Ok(DataType::Int),
            "number" => Ok(DataType::Number),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "date" => Ok(DataType::Date),
            "uuid" => Ok(DataType::Uuid),
            other => Err(format!("unknown data type: {}", other)),
        }
    }
}

/// A declared property of a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub data_type: DataType,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Class definition needed to build and validate shards
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassSchema {
    pub name: String,
    pub properties: Vec<PropertyDef>,
}

impl ClassSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.properties.push(PropertyDef::new(name, data_type));
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Shard assignment of a class, captured once at index construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingState {
    shards: Vec<String>,
    pub replication_factor: usize,
}

impl ShardingState {
    /// Shard names are sorted and de-duplicated so routing does not depend on
    /// the order the assignment was supplied in.
    pub fn new<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut shards: Vec<String> = shards.into_iter().map(Into::into).collect();
        shards.sort();
        shards.dedup();
        Self {
            shards,
            replication_factor: 1,
        }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self::new([name.into()])
    }

    /// `count` shards named `shard_0 .. shard_{count-1}`
    pub fn with_count(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("shard_{}", i)))
    }

    pub fn with_replication_factor(mut self, factor: usize) -> Self {
        self.replication_factor = factor;
        self
    }

    pub fn shard_names(&self) -> &[String] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Deterministic owner of `id`
    pub fn shard_for(&self, id: &Uuid) -> Option<&str> {
        if self.shards.is_empty() {
            return None;
        }
        let slot = crc32fast::hash(id.as_bytes()) as usize % self.shards.len();
        Some(self.shards[slot].as_str())
    }
}

/// Source of class definitions and shard assignments
pub trait SchemaProvider: Send + Sync {
    fn class(&self, name: &str) -> Option<ClassSchema>;

    fn sharding_state(&self, class: &str) -> Option<ShardingState>;
}

/// In-memory schema provider
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    classes: HashMap<String, (ClassSchema, ShardingState)>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class: ClassSchema, sharding: ShardingState) -> Self {
        self.classes.insert(class.name.clone(), (class, sharding));
        self
    }
}

impl SchemaProvider for StaticSchema {
    fn class(&self, name: &str) -> Option<ClassSchema> {
        self.classes.get(name).map(|(class, _)| class.clone())
    }

    fn sharding_state(&self, class: &str) -> Option<ShardingState> {
        self.classes.get(class).map(|(_, sharding)| sharding.clone())
    }
}

/// Class and shard names become directory names
pub(crate) fn validate_path_component(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} name must not be empty", kind));
    }
    if name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(format!("{} name {:?} is not a valid directory name", kind, name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_parsing() {
        assert_eq!("string".parse::<DataType>().unwrap(), DataType::Text);
        assert_eq!("TEXT".parse::<DataType>().unwrap(), DataType::Text);
        assert_eq!("uuid".parse::<DataType>().unwrap(), DataType::Uuid);
        assert!("geo".parse::<DataType>().is_err());
        assert_eq!(DataType::Number.to_string(), "number");
    }

    #[test]
    fn test_sharding_is_deterministic() {
        let a = ShardingState::new(["b", "a", "c"]);
        let b = ShardingState::new(["c", "b", "a", "a"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);

        for _ in 0..100 {
            let id = Uuid::new_v4();
            assert_eq!(a.shard_for(&id), b.shard_for(&id));
        }
    }

    #[test]
    fn test_sharding_spreads_ids() {
        let state = ShardingState::with_count(4);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(state.shard_for(&Uuid::new_v4()).unwrap().to_string());
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_empty_sharding_has_no_owner() {
        let state = ShardingState::new(Vec::<String>::new());
        assert!(state.shard_for(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_static_schema_provider() {
        let provider = StaticSchema::new().with_class(
            ClassSchema::new("Article").with_property("title", DataType::Text),
            ShardingState::single("s1"),
        );

        let class = provider.class("Article").unwrap();
        assert_eq!(class.property("title").unwrap().data_type, DataType::Text);
        assert!(provider.class("Missing").is_none());
        assert_eq!(provider.sharding_state("Article").unwrap().shard_names(), ["s1"]);
    }

    #[test]
    fn test_path_components() {
        assert!(validate_path_component("class", "Article").is_ok());
        assert!(validate_path_component("class", "").is_err());
        assert!(validate_path_component("class", "..").is_err());
        assert!(validate_path_component("shard", "a/b").is_err());
    }
}
