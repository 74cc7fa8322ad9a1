//! Stored objects and property values

use crate::schema::DataType;
use crate::storage::{StorageError, StorageResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A scalar property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    Number(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Uuid(Uuid),
}

impl PropertyValue {
    pub fn data_type(&self) -> DataType {
        match self {
            PropertyValue::Text(_) => DataType::Text,
            PropertyValue::Int(_) => DataType::Int,
            PropertyValue::Number(_) => DataType::Number,
            PropertyValue::Boolean(_) => DataType::Boolean,
            PropertyValue::Date(_) => DataType::Date,
            PropertyValue::Uuid(_) => DataType::Uuid,
        }
    }

    /// Length tracked by the property-length statistics (text only)
    pub fn length(&self) -> Option<usize> {
        match self {
            PropertyValue::Text(s) => Some(s.chars().count()),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::Date(value)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(value: Uuid) -> Self {
        PropertyValue::Uuid(value)
    }
}

/// Property values of one object, keyed by property name
pub type Properties = BTreeMap<String, PropertyValue>;

/// An object as persisted by a shard: identifier, opaque payload, vector and
/// scalar properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: Uuid,
    pub class: String,
    pub payload: Bytes,
    pub vector: Vec<f32>,
    pub properties: Properties,
}

impl StoredObject {
    pub fn new(class: impl Into<String>, id: Uuid) -> Self {
        Self {
            id,
            class: class.into(),
            payload: Bytes::new(),
            vector: Vec::new(),
            properties: Properties::new(),
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        bincode::serialize(self).map_err(StorageError::serialization)
    }

    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        bincode::deserialize(data).map_err(StorageError::serialization)
    }
}
