//! Property index
//!
//! Inverted index over scalar property values. The log (`inverted.log`)
//! records property declarations and the property map of every object; the
//! in-memory structures are rebuilt from it on open:
//!
//! - per-property postings ordered by [`key::encode`]
//! - the property map of each object, used to backfill new properties
//! - property length accumulators (text properties)
//! - null sets: objects without a value for a declared property
//!
//! The implicit `_id` property indexes the object id itself once declared.

pub mod key;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use uuid::Uuid;

use crate::defaults::{INVERTED_FILE, UUID_PROPERTY};
use crate::object::{Properties, PropertyValue};
use crate::schema::{DataType, PropertyDef};
use crate::storage::{BlockStorage, StorageError, StorageResult, SubStore};
use crate::wal::entry::{kind, LogEntry};
use crate::wal::RecordLog;

/// Durable index over scalar property values
#[async_trait]
pub trait PropertyIndex: SubStore {
    /// Start indexing a property, backfilling every object already stored.
    ///
    /// Returns `false` when the property was already declared with the same
    /// type. Declaring it with another type is an error.
    async fn declare(&self, def: PropertyDef) -> StorageResult<bool>;

    /// Declared type of `name`
    fn property_type(&self, name: &str) -> Option<DataType>;

    /// Every declared property, sorted by name
    fn properties(&self) -> Vec<PropertyDef>;

    /// Insert or replace the property values of `id`
    async fn put(&self, id: Uuid, properties: &Properties) -> StorageResult<()>;

    /// Property values of `id` as last put
    fn get(&self, id: &Uuid) -> Option<Properties>;

    /// Remove `id` from every posting. Returns whether it was present.
    async fn delete(&self, id: &Uuid) -> StorageResult<bool>;

    /// Objects whose `name` equals `value`
    fn filter_equal(&self, name: &str, value: &PropertyValue) -> Vec<Uuid>;

    /// Objects whose `name` lies within the bounds
    fn filter_range(
        &self,
        name: &str,
        lower: Bound<&PropertyValue>,
        upper: Bound<&PropertyValue>,
    ) -> Vec<Uuid>;

    /// Objects with (`is_null == false`) or without a value for `name`
    fn filter_null(&self, name: &str, is_null: bool) -> Vec<Uuid>;

    /// Total length and number of the text values of `name`
    fn property_lengths(&self, name: &str) -> Option<(u64, u64)>;

    /// Mean length of the text values of `name`
    fn property_length_mean(&self, name: &str) -> Option<f64> {
        match self.property_lengths(name)? {
            (_, 0) => None,
            (sum, count) => Some(sum as f64 / count as f64),
        }
    }

    /// Number of indexed objects
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LengthStats {
    sum: u64,
    count: u64,
}

type Postings = BTreeMap<Vec<u8>, HashSet<Uuid>>;

#[derive(Debug, Default)]
struct InvertedState {
    properties: BTreeMap<String, DataType>,
    postings: HashMap<String, Postings>,
    objects: HashMap<Uuid, Properties>,
    lengths: HashMap<String, LengthStats>,
    nulls: HashMap<String, HashSet<Uuid>>,
}

impl InvertedState {
    fn value_of(id: &Uuid, properties: &Properties, name: &str) -> Option<PropertyValue> {
        if name == UUID_PROPERTY {
            return Some(PropertyValue::Uuid(*id));
        }
        properties.get(name).cloned()
    }

    fn declare(&mut self, def: PropertyDef) {
        if self.properties.contains_key(&def.name) {
            return;
        }
        self.properties.insert(def.name.clone(), def.data_type);
        self.postings.entry(def.name.clone()).or_default();
        self.nulls.entry(def.name.clone()).or_default();

        let ids: Vec<Uuid> = self.objects.keys().copied().collect();
        for id in ids {
            let value = self
                .objects
                .get(&id)
                .and_then(|props| Self::value_of(&id, props, &def.name));
            self.index_value(&id, &def.name, def.data_type, value);
        }
    }

    fn index_value(&mut self, id: &Uuid, name: &str, data_type: DataType, value: Option<PropertyValue>) {
        let value = match value {
            Some(value) if value.data_type() == data_type => value,
            Some(value) => {
                tracing::warn!(
                    property = name,
                    expected = %data_type,
                    actual = %value.data_type(),
                    "skipping property value of the wrong type"
                );
                if let Some(nulls) = self.nulls.get_mut(name) {
                    nulls.insert(*id);
                }
                return;
            }
            None => {
                if let Some(nulls) = self.nulls.get_mut(name) {
                    nulls.insert(*id);
                }
                return;
            }
        };

        if let Some(len) = value.length() {
            let stats = self.lengths.entry(name.to_string()).or_default();
            stats.sum += len as u64;
            stats.count += 1;
        }
        self.postings
            .entry(name.to_string())
            .or_default()
            .entry(key::encode(&value))
            .or_default()
            .insert(*id);
    }

    fn index_object(&mut self, id: Uuid, properties: Properties) {
        self.unindex_object(&id);

        let declared: Vec<(String, DataType)> = self
            .properties
            .iter()
            .map(|(name, ty)| (name.clone(), *ty))
            .collect();
        for (name, data_type) in declared {
            let value = Self::value_of(&id, &properties, &name);
            self.index_value(&id, &name, data_type, value);
        }
        self.objects.insert(id, properties);
    }

    fn unindex_object(&mut self, id: &Uuid) -> bool {
        let properties = match self.objects.remove(id) {
            Some(properties) => properties,
            None => return false,
        };

        for (name, data_type) in &self.properties {
            if let Some(nulls) = self.nulls.get_mut(name) {
                if nulls.remove(id) {
                    continue;
                }
            }
            let value = match Self::value_of(id, &properties, name) {
                Some(value) if value.data_type() == *data_type => value,
                _ => continue,
            };
            if let Some(len) = value.length() {
                if let Some(stats) = self.lengths.get_mut(name) {
                    stats.sum = stats.sum.saturating_sub(len as u64);
                    stats.count = stats.count.saturating_sub(1);
                }
            }
            if let Some(postings) = self.postings.get_mut(name) {
                let key = key::encode(&value);
                if let Some(ids) = postings.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        postings.remove(&key);
                    }
                }
            }
        }
        true
    }

    fn apply(&mut self, entry: LogEntry) -> StorageResult<()> {
        match entry.kind {
            kind::DECLARE => {
                let def: PropertyDef =
                    bincode::deserialize(&entry.payload).map_err(StorageError::serialization)?;
                self.declare(def);
            }
            kind::PUT => {
                let properties: Properties =
                    bincode::deserialize(&entry.payload).map_err(StorageError::serialization)?;
                self.index_object(entry.key, properties);
            }
            kind::DELETE => {
                self.unindex_object(&entry.key);
            }
            other => tracing::warn!(kind = other, "unknown property index entry kind"),
        }
        Ok(())
    }
}

fn sorted(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort();
    ids
}

fn encode_bound(bound: Bound<&PropertyValue>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(v) => Bound::Included(key::encode(v)),
        Bound::Excluded(v) => Bound::Excluded(key::encode(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// `BTreeMap::range` panics on inverted or empty-exclusive bounds
fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

/// [`PropertyIndex`] backed by a record log
pub struct LogPropertyIndex {
    log: RecordLog,
    state: RwLock<InvertedState>,
    /// Serializes declarations from type check to apply
    declare_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for LogPropertyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("LogPropertyIndex")
            .field("path", &self.log.path())
            .field("properties", &state.properties)
            .field("objects", &state.objects.len())
            .finish()
    }
}

impl LogPropertyIndex {
    pub async fn open(storage: Arc<dyn BlockStorage>, dir: &str) -> StorageResult<Self> {
        let (log, entries) = RecordLog::open(storage, format!("{}/{}", dir, INVERTED_FILE)).await?;

        let mut state = InvertedState::default();
        for (_, entry) in entries {
            state.apply(entry)?;
        }

        Ok(Self {
            log,
            state: RwLock::new(state),
            declare_lock: tokio::sync::Mutex::new(()),
        })
    }
}

#[async_trait]
impl SubStore for LogPropertyIndex {
    async fn flush(&self) -> StorageResult<()> {
        Ok(self.log.sync().await?)
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(self.log.close().await?)
    }

    async fn wipe(&self) -> StorageResult<()> {
        self.log.delete().await?;
        *self.state.write() = InvertedState::default();
        Ok(())
    }

    fn artifacts(&self) -> Vec<String> {
        vec![self.log.path().to_string()]
    }

    fn kind_name(&self) -> &'static str {
        "inverted"
    }
}

#[async_trait]
impl PropertyIndex for LogPropertyIndex {
    async fn declare(&self, def: PropertyDef) -> StorageResult<bool> {
        let _guard = self.declare_lock.lock().await;
        match self.property_type(&def.name) {
            Some(existing) if existing == def.data_type => return Ok(false),
            Some(existing) => {
                return Err(StorageError::Backend(format!(
                    "property {} already declared as {}",
                    def.name, existing
                )))
            }
            None => {}
        }

        let payload = bincode::serialize(&def).map_err(StorageError::serialization)?;
        self.log.append(kind::DECLARE, Uuid::nil(), payload).await?;
        self.state.write().declare(def);
        Ok(true)
    }

    fn property_type(&self, name: &str) -> Option<DataType> {
        self.state.read().properties.get(name).copied()
    }

    fn properties(&self) -> Vec<PropertyDef> {
        self.state
            .read()
            .properties
            .iter()
            .map(|(name, ty)| PropertyDef::new(name.clone(), *ty))
            .collect()
    }

    async fn put(&self, id: Uuid, properties: &Properties) -> StorageResult<()> {
        let payload = bincode::serialize(properties).map_err(StorageError::serialization)?;
        self.log.append(kind::PUT, id, payload).await?;
        self.state.write().index_object(id, properties.clone());
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Option<Properties> {
        self.state.read().objects.get(id).cloned()
    }

    async fn delete(&self, id: &Uuid) -> StorageResult<bool> {
        if !self.state.read().objects.contains_key(id) {
            return Ok(false);
        }
        self.log.append(kind::DELETE, *id, Vec::new()).await?;
        Ok(self.state.write().unindex_object(id))
    }

    fn filter_equal(&self, name: &str, value: &PropertyValue) -> Vec<Uuid> {
        let state = self.state.read();
        state
            .postings
            .get(name)
            .and_then(|postings| postings.get(&key::encode(value)))
            .map(|ids| sorted(ids.iter().copied()))
            .unwrap_or_default()
    }

    fn filter_range(
        &self,
        name: &str,
        lower: Bound<&PropertyValue>,
        upper: Bound<&PropertyValue>,
    ) -> Vec<Uuid> {
        let lower = encode_bound(lower);
        let upper = encode_bound(upper);
        if is_empty_range(&lower, &upper) {
            return Vec::new();
        }

        let state = self.state.read();
        match state.postings.get(name) {
            Some(postings) => sorted(
                postings
                    .range((lower, upper))
                    .flat_map(|(_, ids)| ids.iter().copied()),
            ),
            None => Vec::new(),
        }
    }

    fn filter_null(&self, name: &str, is_null: bool) -> Vec<Uuid> {
        let state = self.state.read();
        let nulls = match state.nulls.get(name) {
            Some(nulls) => nulls,
            None => return Vec::new(),
        };
        if is_null {
            sorted(nulls.iter().copied())
        } else {
            sorted(state.objects.keys().filter(|id| !nulls.contains(id)).copied())
        }
    }

    fn property_lengths(&self, name: &str) -> Option<(u64, u64)> {
        let state = self.state.read();
        state.lengths.get(name).map(|stats| (stats.sum, stats.count))
    }

    fn len(&self) -> usize {
        self.state.read().objects.len()
    }
}
