//! Shard management
//!
//! A shard is the unit of physical storage. It exclusively owns:
//! - an object store (source of truth for reads)
//! - a property index
//! - a vector index
//! - a status flag (see [`ShardStatus`])
//!
//! Object writes fan out to the three sub-stores under a per-identifier
//! lock stripe. The lifecycle lock is held shared by reads and writes and
//! exclusively by status changes, close and drop, so a transition waits for
//! in-flight writes and no write starts once it is queued.

pub mod layout;
pub mod status;

pub use layout::{ShardLayout, ShardMeta};
pub use status::ShardStatus;

use bytes::Bytes;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::defaults::UUID_PROPERTY;
use crate::error::{Result, VaultError};
use crate::inverted::{LogPropertyIndex, PropertyIndex};
use crate::object::{Properties, PropertyValue, StoredObject};
use crate::objects::{LogObjectStore, ObjectStore};
use crate::schema::{validate_path_component, ClassSchema, DataType, PropertyDef};
use crate::storage::{BlockStorage, StorageResult};
use crate::vector_index::{open_vector_index, VectorIndex, VectorIndexConfig};

/// Open handles of the three sub-stores
struct Stores {
    objects: Arc<dyn ObjectStore>,
    properties: Arc<dyn PropertyIndex>,
    vectors: Arc<dyn VectorIndex>,
}

impl Stores {
    async fn flush(&self) -> StorageResult<()> {
        self.objects.flush().await?;
        self.properties.flush().await?;
        self.vectors.flush().await
    }

    /// Close all three stores, reporting the first failure
    async fn close(&self) -> StorageResult<()> {
        let results = [
            (self.objects.kind_name(), self.objects.close().await),
            (self.properties.kind_name(), self.properties.close().await),
            (self.vectors.kind_name(), self.vectors.close().await),
        ];

        let mut first_error = None;
        for (store, result) in results {
            if let Err(e) = result {
                tracing::error!(store, error = %e, "failed to close sub-store");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn wipe(&self) -> StorageResult<()> {
        self.objects.wipe().await?;
        self.properties.wipe().await?;
        self.vectors.wipe().await
    }
}

struct ShardState {
    status: ShardStatus,
    /// `None` once the shard was closed or dropped
    stores: Option<Stores>,
}

pub struct Shard {
    name: String,
    class: String,
    layout: ShardLayout,
    storage: Arc<dyn BlockStorage>,
    vector_config: VectorIndexConfig,
    state: RwLock<ShardState>,
    stripes: Vec<Mutex<()>>,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("class", &self.class)
            .field("name", &self.name)
            .field("dir", &self.layout.dir())
            .finish()
    }
}

impl Shard {
    /// Load the shard from its directory, or initialize it when absent.
    ///
    /// Properties of `schema` are declared on the property index. A fresh
    /// shard persists exactly its five minimum artifacts.
    pub async fn open(
        storage: Arc<dyn BlockStorage>,
        config: &IndexConfig,
        schema: &ClassSchema,
        name: &str,
    ) -> Result<Self> {
        let class = config.class_name.as_str();
        validate_path_component("shard", name).map_err(|e| VaultError::initialization(class, e))?;

        let layout = ShardLayout::new(class, name);
        let init_err = |e: VaultError| VaultError::initialization(class, format!("shard {}: {}", name, e));

        let existing = layout.read_meta(&*storage).await?;
        if existing.is_none() && storage.exists(layout.dir()).await.map_err(|e| init_err(e.into()))? {
            tracing::warn!(class, shard = name, "clearing shard directory without version marker");
            storage
                .remove_dir(layout.dir())
                .await
                .map_err(|e| init_err(e.into()))?;
        }
        storage
            .create_dir(layout.dir())
            .await
            .map_err(|e| init_err(e.into()))?;

        let stores = Self::open_stores(&storage, &layout, &config.vector_index)
            .await
            .map_err(|e| init_err(e.into()))?;

        for def in &schema.properties {
            match stores.properties.property_type(&def.name) {
                Some(indexed) if indexed != def.data_type => {
                    return Err(VaultError::initialization(
                        class,
                        format!(
                            "shard {} indexes {} as {}, schema declares {}",
                            name, def.name, indexed, def.data_type
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    stores
                        .properties
                        .declare(def.clone())
                        .await
                        .map_err(|e| init_err(e.into()))?;
                }
            }
        }

        match existing {
            Some(meta) => {
                tracing::info!(class, shard = name, objects = stores.objects.len(), created_at = %meta.created_at, "shard loaded");
            }
            None => {
                layout.write_meta(&*storage).await.map_err(init_err)?;
                tracing::info!(class, shard = name, "shard created");
            }
        }

        let stripes = (0..config.lock_stripes.max(1)).map(|_| Mutex::new(())).collect();

        Ok(Self {
            name: name.to_string(),
            class: class.to_string(),
            layout,
            storage,
            vector_config: config.vector_index.clone(),
            state: RwLock::new(ShardState {
                status: ShardStatus::Ready,
                stores: Some(stores),
            }),
            stripes,
        })
    }

    async fn open_stores(
        storage: &Arc<dyn BlockStorage>,
        layout: &ShardLayout,
        vector_config: &VectorIndexConfig,
    ) -> StorageResult<Stores> {
        let objects = LogObjectStore::open(storage.clone(), layout.dir()).await?;
        let properties = LogPropertyIndex::open(storage.clone(), layout.dir()).await?;
        let vectors = open_vector_index(vector_config, storage.clone(), layout.dir()).await?;

        Ok(Stores {
            objects: Arc::new(objects),
            properties: Arc::new(properties),
            vectors,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Shard directory relative to the storage root
    pub fn dir(&self) -> &str {
        self.layout.dir()
    }

    pub async fn status(&self) -> ShardStatus {
        self.state.read().await.status
    }

    fn stripe(&self, id: &Uuid) -> &Mutex<()> {
        let slot = crc32fast::hash(id.as_bytes()) as usize % self.stripes.len();
        &self.stripes[slot]
    }

    /// Stores of a shard that is neither dropped nor closed
    fn open_stores_of<'a>(&self, state: &'a ShardState) -> Result<&'a Stores> {
        if state.status == ShardStatus::Dropped {
            return Err(VaultError::ShardDropped {
                shard: self.name.clone(),
            });
        }
        state.stores.as_ref().ok_or_else(|| VaultError::ShardClosed {
            shard: self.name.clone(),
        })
    }

    fn writable_stores<'a>(&self, state: &'a ShardState) -> Result<&'a Stores> {
        let stores = self.open_stores_of(state)?;
        if !state.status.allows_writes() {
            return Err(VaultError::ShardReadOnly {
                shard: self.name.clone(),
            });
        }
        Ok(stores)
    }

    fn validate_object(&self, stores: &Stores, object: &StoredObject) -> Result<()> {
        if object.class != self.class {
            return Err(VaultError::validation(format!(
                "object {} belongs to class {:?}, not {:?}",
                object.id, object.class, self.class
            )));
        }

        if !object.vector.is_empty() {
            if let Some(expected) = self.vector_config.dimensions.or_else(|| stores.vectors.dims()) {
                if expected != object.vector.len() {
                    return Err(VaultError::dimension_mismatch(expected, object.vector.len()));
                }
            }
            if object.vector.iter().any(|v| !v.is_finite()) {
                return Err(VaultError::validation(format!(
                    "vector of object {} contains non-finite values",
                    object.id
                )));
            }
        }

        for (name, value) in &object.properties {
            if name == UUID_PROPERTY {
                return Err(VaultError::validation(format!(
                    "{} is reserved for the object id",
                    UUID_PROPERTY
                )));
            }
            match stores.properties.property_type(name) {
                None => {
                    return Err(VaultError::validation(format!(
                        "property {} is not part of class {}",
                        name, self.class
                    )))
                }
                Some(expected) if expected != value.data_type() => {
                    return Err(VaultError::validation(format!(
                        "property {} expects {}, got {}",
                        name,
                        expected,
                        value.data_type()
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Insert or replace an object.
    ///
    /// Sub-stores are written vector index first and object store last, so a
    /// reader never sees an object before every part of it is stored. A
    /// failure restores the earlier sub-stores to the previous version.
    pub async fn put_object(&self, ctx: &CancellationToken, object: StoredObject) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }

        let state = self.state.read().await;
        let stores = self.writable_stores(&state)?;
        self.validate_object(stores, &object)?;

        let _guard = self.stripe(&object.id).lock().await;
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }

        let previous = match stores.objects.get(&object.id).await? {
            Some(data) => Some(StoredObject::decode(&data)?),
            None => None,
        };
        let encoded = Bytes::from(object.encode()?);
        let id = object.id;

        let vector_write = if object.vector.is_empty() {
            stores.vectors.delete(&id).await.map(|_| ())
        } else {
            stores.vectors.insert(id, &object.vector).await
        };
        if let Err(e) = vector_write {
            self.restore_vector(stores, &id, previous.as_ref()).await;
            // A concurrent first vector of another length fixed the dimensions
            if let Some(expected) = stores.vectors.dims() {
                if expected != object.vector.len() {
                    return Err(VaultError::dimension_mismatch(expected, object.vector.len()));
                }
            }
            return Err(e.into());
        }

        if let Err(e) = stores.properties.put(id, &object.properties).await {
            self.restore_properties(stores, &id, previous.as_ref()).await;
            self.restore_vector(stores, &id, previous.as_ref()).await;
            return Err(e.into());
        }

        if let Err(e) = stores.objects.put(id, encoded).await {
            self.restore_properties(stores, &id, previous.as_ref()).await;
            self.restore_vector(stores, &id, previous.as_ref()).await;
            return Err(e.into());
        }

        tracing::trace!(class = %self.class, shard = %self.name, %id, "object stored");
        Ok(())
    }

    async fn restore_vector(&self, stores: &Stores, id: &Uuid, previous: Option<&StoredObject>) {
        let result = match previous {
            Some(prev) if !prev.vector.is_empty() => stores.vectors.insert(*id, &prev.vector).await,
            _ => stores.vectors.delete(id).await.map(|_| ()),
        };
        if let Err(e) = result {
            tracing::error!(class = %self.class, shard = %self.name, %id, error = %e, "failed to roll back vector index");
        }
    }

    async fn restore_properties(&self, stores: &Stores, id: &Uuid, previous: Option<&StoredObject>) {
        let result = match previous {
            Some(prev) => stores.properties.put(*id, &prev.properties).await,
            None => stores.properties.delete(id).await.map(|_| ()),
        };
        if let Err(e) = result {
            tracing::error!(class = %self.class, shard = %self.name, %id, error = %e, "failed to roll back property index");
        }
    }

    /// Read an object. `None` when the id is absent.
    pub async fn object_by_id(&self, ctx: &CancellationToken, id: &Uuid) -> Result<Option<StoredObject>> {
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;
        Self::resolve(stores, id).await
    }

    async fn resolve(stores: &Stores, id: &Uuid) -> Result<Option<StoredObject>> {
        match stores.objects.get(id).await? {
            Some(data) => Ok(Some(StoredObject::decode(&data)?)),
            None => Ok(None),
        }
    }

    /// Delete an object. Returns whether it existed.
    pub async fn delete_object(&self, ctx: &CancellationToken, id: &Uuid) -> Result<bool> {
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }

        let state = self.state.read().await;
        let stores = self.writable_stores(&state)?;

        let _guard = self.stripe(id).lock().await;
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }

        // The object store goes first so the object disappears at once
        let existed = stores.objects.delete(id).await?;
        stores.properties.delete(id).await?;
        stores.vectors.delete(id).await?;

        if existed {
            tracing::trace!(class = %self.class, shard = %self.name, %id, "object deleted");
        }
        Ok(existed)
    }

    /// Whether `def` still has to be declared here. A declaration of another
    /// type is a conflict.
    fn declaration(&self, stores: &Stores, def: &PropertyDef) -> Result<bool> {
        let existing = if def.name == UUID_PROPERTY {
            Some(DataType::Uuid)
        } else {
            stores.properties.property_type(&def.name)
        };
        match existing {
            Some(existing) if existing != def.data_type => Err(VaultError::SchemaConflict {
                property: def.name.clone(),
                existing,
                requested: def.data_type,
            }),
            _ => Ok(stores.properties.property_type(&def.name).is_none()),
        }
    }

    /// Fail the way [`Shard::add_property`] would, without declaring anything
    pub async fn check_property(&self, def: &PropertyDef) -> Result<()> {
        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;
        if self.declaration(stores, def)? {
            self.writable_stores(&state)?;
        }
        Ok(())
    }

    /// Declare a property on the property index, backfilling stored objects.
    ///
    /// Re-declaring with the same type is a no-op, even on a read-only shard.
    pub async fn add_property(&self, ctx: &CancellationToken, def: PropertyDef) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }

        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;
        if !self.declaration(stores, &def)? {
            return Ok(());
        }

        let stores = self.writable_stores(&state)?;
        let name = def.name.clone();
        let requested = def.data_type;
        if let Err(e) = stores.properties.declare(def).await {
            // Lost against a declaration of another type
            if let Some(existing) = stores.properties.property_type(&name) {
                if existing != requested {
                    return Err(VaultError::SchemaConflict {
                        property: name,
                        existing,
                        requested,
                    });
                }
            }
            return Err(e.into());
        }
        tracing::debug!(class = %self.class, shard = %self.name, property = %name, "property added");
        Ok(())
    }

    /// Switch between `Ready` and `ReadOnly`
    pub async fn update_status(&self, next: ShardStatus) -> Result<()> {
        let mut state = self.state.write().await;
        if state.status == ShardStatus::Dropped {
            return Err(VaultError::ShardDropped {
                shard: self.name.clone(),
            });
        }
        if !state.status.can_transition_to(next) {
            return Err(VaultError::validation(format!(
                "shard {} cannot move from {} to {} through a status update",
                self.name, state.status, next
            )));
        }
        if state.stores.is_none() {
            return Err(VaultError::ShardClosed {
                shard: self.name.clone(),
            });
        }

        let previous = std::mem::replace(&mut state.status, next);
        if previous != next {
            tracing::info!(class = %self.class, shard = %self.name, from = %previous, status = %next, "shard status changed");
        }
        Ok(())
    }

    /// Close every sub-store and delete every artifact of the shard.
    ///
    /// Allowed from `Ready` and `ReadOnly`. Dropping a dropped shard is a
    /// no-op. A failed drop can be retried.
    pub async fn drop_shard(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.status == ShardStatus::Dropped {
            return Ok(());
        }

        if let Some(stores) = state.stores.take() {
            if let Err(e) = stores.close().await {
                state.stores = Some(stores);
                return Err(e.into());
            }
            stores.wipe().await?;
        }

        // Leftovers of a closed shard or of an earlier failed attempt
        for path in self.layout.data_files() {
            self.storage.delete(&path).await?;
        }
        self.storage.delete(&self.layout.version_path()).await?;
        self.storage.remove_dir(self.layout.dir()).await?;

        state.status = ShardStatus::Dropped;
        tracing::info!(class = %self.class, shard = %self.name, "shard dropped");
        Ok(())
    }

    /// Flush and release every sub-store without deleting data.
    ///
    /// Later operations fail with `ShardClosed`.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(stores) = state.stores.take() {
            stores.close().await?;
            tracing::info!(class = %self.class, shard = %self.name, "shard closed");
        }
        Ok(())
    }

    /// Make every acknowledged write durable
    pub async fn flush(&self) -> Result<()> {
        let state = self.state.read().await;
        self.open_stores_of(&state)?.flush().await?;
        Ok(())
    }

    /// Nearest objects to `query`, closest first
    pub async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<(StoredObject, f32)>> {
        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;

        match stores.vectors.dims() {
            Some(dims) if dims != query.len() => {
                return Err(VaultError::dimension_mismatch(dims, query.len()))
            }
            None => return Ok(Vec::new()),
            Some(_) => {}
        }

        let mut results = Vec::new();
        for (id, distance) in stores.vectors.search(query, k) {
            if let Some(object) = Self::resolve(stores, &id).await? {
                results.push((object, distance));
            }
        }
        Ok(results)
    }

    /// Declared type of `name`, checked against the values it is queried with
    fn queried_type(&self, stores: &Stores, name: &str, values: &[&PropertyValue]) -> Result<DataType> {
        let expected = stores
            .properties
            .property_type(name)
            .ok_or_else(|| VaultError::validation(format!("property {} is not indexed", name)))?;
        if let Some(value) = values.iter().find(|v| v.data_type() != expected) {
            return Err(VaultError::validation(format!(
                "property {} expects {}, got {}",
                name,
                expected,
                value.data_type()
            )));
        }
        Ok(expected)
    }

    async fn resolve_all(stores: &Stores, ids: Vec<Uuid>) -> Result<Vec<StoredObject>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(object) = Self::resolve(stores, &id).await? {
                results.push(object);
            }
        }
        Ok(results)
    }

    /// Objects whose property `name` equals `value`
    pub async fn find_by_property(&self, name: &str, value: &PropertyValue) -> Result<Vec<StoredObject>> {
        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;
        self.queried_type(stores, name, &[value])?;

        Self::resolve_all(stores, stores.properties.filter_equal(name, value)).await
    }

    /// Objects whose property `name` lies within the bounds
    pub async fn filter_range(
        &self,
        name: &str,
        lower: Bound<&PropertyValue>,
        upper: Bound<&PropertyValue>,
    ) -> Result<Vec<StoredObject>> {
        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;
        let bounds: Vec<&PropertyValue> = [lower, upper]
            .into_iter()
            .filter_map(|bound| match bound {
                Bound::Included(v) | Bound::Excluded(v) => Some(v),
                Bound::Unbounded => None,
            })
            .collect();
        self.queried_type(stores, name, &bounds)?;

        Self::resolve_all(stores, stores.properties.filter_range(name, lower, upper)).await
    }

    /// Objects without (`is_null`) or with a value for property `name`
    pub async fn filter_null(&self, name: &str, is_null: bool) -> Result<Vec<StoredObject>> {
        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;
        self.queried_type(stores, name, &[])?;

        Self::resolve_all(stores, stores.properties.filter_null(name, is_null)).await
    }

    /// Total length and number of the text values of `name`
    pub async fn property_lengths(&self, name: &str) -> Result<(u64, u64)> {
        let state = self.state.read().await;
        let stores = self.open_stores_of(&state)?;
        if self.queried_type(stores, name, &[])? != DataType::Text {
            return Err(VaultError::validation(format!("property {} is not text", name)));
        }
        Ok(stores.properties.property_lengths(name).unwrap_or((0, 0)))
    }

    /// Mean length of the text values of `name`. `None` without values.
    pub async fn property_length_mean(&self, name: &str) -> Result<Option<f64>> {
        Ok(match self.property_lengths(name).await? {
            (_, 0) => None,
            (sum, count) => Some(sum as f64 / count as f64),
        })
    }

    /// Dimensionality of stored vectors, `None` before the first one
    pub async fn vector_dims(&self) -> Result<Option<usize>> {
        let state = self.state.read().await;
        Ok(self.open_stores_of(&state)?.vectors.dims())
    }

    /// Properties indexed by this shard
    pub async fn properties(&self) -> Result<Vec<PropertyDef>> {
        let state = self.state.read().await;
        Ok(self.open_stores_of(&state)?.properties.properties())
    }

    /// Stored property values of `id`, as seen by the property index
    pub async fn indexed_properties(&self, id: &Uuid) -> Result<Option<Properties>> {
        let state = self.state.read().await;
        Ok(self.open_stores_of(&state)?.properties.get(id))
    }

    pub async fn object_count(&self) -> Result<usize> {
        let state = self.state.read().await;
        Ok(self.open_stores_of(&state)?.objects.len())
    }

    /// Files currently persisted below the shard directory
    pub async fn artifacts(&self) -> Result<Vec<String>> {
        Ok(self.storage.list(self.layout.dir()).await?)
    }
}
