//! Class index
//!
//! Top-level aggregate of one class: owns every shard named by the shard
//! assignment, routes object operations to the owning shard and coordinates
//! lifecycle operations across all of them.
//!
//! Writes and drops run on spawned tasks, so a caller that gives up on the
//! returned future never interrupts a fan-out or a teardown halfway.
//!
//! Vector dimensionality is fixed index-wide: by the configuration, or by the
//! first vector stored on any shard.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::defaults::UUID_PROPERTY;
use crate::error::{Result, VaultError};
use crate::object::{PropertyValue, StoredObject};
use crate::schema::{
    validate_path_component, ClassSchema, DataType, PropertyDef, SchemaProvider, ShardingState,
};
use crate::shard::{Shard, ShardStatus};
use crate::storage::{BlockStorage, LocalBlockStorage};

/// Per-class aggregate of shards
pub struct Index {
    config: IndexConfig,
    schema: RwLock<ClassSchema>,
    sharding: ShardingState,
    storage: Arc<dyn BlockStorage>,
    shards: HashMap<String, Arc<Shard>>,
    /// Vector dimensionality of every shard, `None` before the first vector
    dims: Arc<Mutex<Option<usize>>>,
    /// Serializes property declarations across shards
    schema_lock: Mutex<()>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("class", &self.config.class_name)
            .field("root", &self.config.root_path)
            .field("shards", &self.sharding.shard_names())
            .finish()
    }
}

impl Index {
    /// Build or load every shard of `schema` below `config.root_path`
    pub async fn new(config: IndexConfig, sharding: ShardingState, schema: ClassSchema) -> Result<Self> {
        let storage = LocalBlockStorage::new(&config.root_path).map_err(|e| {
            VaultError::initialization(
                &config.class_name,
                format!("root path {} is not usable: {}", config.root_path.display(), e),
            )
        })?;
        Self::with_storage(Arc::new(storage), config, sharding, schema).await
    }

    /// Like [`Index::new`], over an existing storage backend rooted at the
    /// index root
    pub async fn with_storage(
        storage: Arc<dyn BlockStorage>,
        config: IndexConfig,
        sharding: ShardingState,
        schema: ClassSchema,
    ) -> Result<Self> {
        let class = config.class_name.clone();
        validate_path_component("class", &class).map_err(|e| VaultError::initialization(&class, e))?;
        if schema.name != class {
            return Err(VaultError::initialization(
                &class,
                format!("schema describes class {:?}", schema.name),
            ));
        }
        if sharding.is_empty() {
            return Err(VaultError::initialization(&class, "shard assignment is empty"));
        }
        if let Some(def) = schema.properties.iter().find(|p| p.name == UUID_PROPERTY) {
            return Err(VaultError::initialization(
                &class,
                format!("{} is reserved, cannot declare it as {}", def.name, def.data_type),
            ));
        }

        storage
            .create_dir(&class)
            .await
            .map_err(|e| VaultError::initialization(&class, e))?;

        let mut shards = HashMap::with_capacity(sharding.len());
        let mut dims = config.vector_index.dimensions;
        for name in sharding.shard_names() {
            let shard = Shard::open(storage.clone(), &config, &schema, name).await?;
            if let Some(found) = shard.vector_dims().await? {
                match dims {
                    Some(expected) if expected != found => {
                        return Err(VaultError::initialization(
                            &class,
                            format!(
                                "shard {} stores {}-dimensional vectors, index uses {}",
                                name, found, expected
                            ),
                        ));
                    }
                    _ => dims = Some(found),
                }
            }
            shards.insert(name.clone(), Arc::new(shard));
        }

        tracing::info!(
            class = %class,
            shards = shards.len(),
            replication_factor = sharding.replication_factor,
            "index ready"
        );

        Ok(Self {
            config,
            schema: RwLock::new(schema),
            sharding,
            storage,
            shards,
            dims: Arc::new(Mutex::new(dims)),
            schema_lock: Mutex::new(()),
        })
    }

    /// Build the index of `config.class_name` from a schema provider
    pub async fn from_provider(config: IndexConfig, provider: &dyn SchemaProvider) -> Result<Self> {
        let class = config.class_name.clone();
        let schema = provider
            .class(&class)
            .ok_or_else(|| VaultError::initialization(&class, "class is not defined"))?;
        let sharding = provider
            .sharding_state(&class)
            .ok_or_else(|| VaultError::initialization(&class, "class has no shard assignment"))?;
        Self::new(config, sharding, schema).await
    }

    pub fn class_name(&self) -> &str {
        &self.config.class_name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Current class schema, including properties added at runtime
    pub fn schema(&self) -> ClassSchema {
        self.schema.read().clone()
    }

    pub fn sharding_state(&self) -> &ShardingState {
        &self.sharding
    }

    /// Shard names, sorted
    pub fn shard_names(&self) -> Vec<String> {
        self.sharding.shard_names().to_vec()
    }

    pub fn shard(&self, name: &str) -> Result<&Arc<Shard>> {
        self.shards
            .get(name)
            .ok_or_else(|| VaultError::unknown_shard(name))
    }

    fn route(&self, id: &Uuid) -> Result<&Arc<Shard>> {
        let name = self
            .sharding
            .shard_for(id)
            .ok_or_else(|| VaultError::unknown_shard(id.to_string()))?;
        self.shard(name)
    }

    /// Shards in name order
    fn ordered_shards(&self) -> impl Iterator<Item = &Arc<Shard>> {
        self.sharding
            .shard_names()
            .iter()
            .filter_map(|name| self.shards.get(name))
    }

    /// Vector dimensionality shared by every shard, `None` before the first
    /// vector
    pub async fn vector_dims(&self) -> Option<usize> {
        *self.dims.lock().await
    }

    /// Declare `def` on every shard once all of them accept it.
    ///
    /// A shard changing status or closing while the declaration fans out can
    /// still leave it on a prefix of the shards. Repeating the call completes
    /// it.
    async fn declare_everywhere(&self, ctx: &CancellationToken, def: &PropertyDef) -> Result<()> {
        for shard in self.ordered_shards() {
            shard.check_property(def).await?;
        }
        for shard in self.ordered_shards() {
            shard.add_property(ctx, def.clone()).await?;
        }
        Ok(())
    }

    /// Ensure every shard indexes object ids. Idempotent.
    pub async fn add_uuid_property(&self, ctx: &CancellationToken) -> Result<()> {
        let _guard = self.schema_lock.lock().await;
        self.declare_everywhere(ctx, &PropertyDef::new(UUID_PROPERTY, DataType::Uuid))
            .await
    }

    /// Declare a property on every shard, backfilling stored objects.
    ///
    /// Nothing is declared unless every shard can take the property.
    pub async fn add_property(&self, ctx: &CancellationToken, def: PropertyDef) -> Result<()> {
        validate_path_component("property", &def.name).map_err(VaultError::validation)?;
        if def.name == UUID_PROPERTY {
            return Err(VaultError::validation(format!(
                "{} is reserved, use add_uuid_property",
                UUID_PROPERTY
            )));
        }

        let _guard = self.schema_lock.lock().await;
        let declared = self.schema.read().property(&def.name).map(|p| p.data_type);
        if let Some(existing) = declared {
            if existing != def.data_type {
                return Err(VaultError::SchemaConflict {
                    property: def.name,
                    existing,
                    requested: def.data_type,
                });
            }
        }

        self.declare_everywhere(ctx, &def).await?;

        let mut schema = self.schema.write();
        if schema.property(&def.name).is_none() {
            tracing::info!(class = %self.config.class_name, property = %def.name, data_type = %def.data_type, "property added");
            schema.properties.push(def);
        }
        Ok(())
    }

    /// Insert or replace an object on its owning shard.
    ///
    /// Vectors of every shard share one dimensionality. Until it is known,
    /// puts carrying a vector run one at a time and the first one to land
    /// fixes it.
    pub async fn put_object(&self, ctx: &CancellationToken, object: StoredObject) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        let shard = self.route(&object.id)?.clone();
        if object.vector.is_empty() {
            return Self::spawn_put(shard, ctx, object, None).await;
        }

        let dims = self.dims.clone().lock_owned().await;
        let known = *dims;
        match known {
            Some(expected) if expected != object.vector.len() => {
                Err(VaultError::dimension_mismatch(expected, object.vector.len()))
            }
            Some(_) => {
                drop(dims);
                Self::spawn_put(shard, ctx, object, None).await
            }
            None => Self::spawn_put(shard, ctx, object, Some(dims)).await,
        }
    }

    /// Run a put on its own task. `unset_dims` is held while the index has
    /// no vectors yet and receives the dimensionality once the put lands.
    async fn spawn_put(
        shard: Arc<Shard>,
        ctx: &CancellationToken,
        object: StoredObject,
        unset_dims: Option<OwnedMutexGuard<Option<usize>>>,
    ) -> Result<()> {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let len = object.vector.len();
            shard.put_object(&ctx, object).await?;
            if let Some(mut dims) = unset_dims {
                *dims = Some(len);
            }
            Ok::<(), VaultError>(())
        })
        .await?
    }

    /// Read an object from its owning shard. `None` when absent.
    pub async fn object_by_id(&self, ctx: &CancellationToken, id: &Uuid) -> Result<Option<StoredObject>> {
        self.route(id)?.object_by_id(ctx, id).await
    }

    /// Delete an object from its owning shard. Returns whether it existed.
    pub async fn delete_object(&self, ctx: &CancellationToken, id: &Uuid) -> Result<bool> {
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        let shard = self.route(id)?.clone();
        let ctx = ctx.clone();
        let id = *id;
        tokio::spawn(async move { shard.delete_object(&ctx, &id).await }).await?
    }

    /// Switch one shard between `Ready` and `ReadOnly`
    pub async fn update_shard_status(
        &self,
        ctx: &CancellationToken,
        shard: &str,
        status: ShardStatus,
    ) -> Result<()> {
        let shard = self.shard(shard)?;
        if ctx.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        shard.update_status(status).await
    }

    pub async fn shard_status(&self, shard: &str) -> Result<ShardStatus> {
        Ok(self.shard(shard)?.status().await)
    }

    /// Drop every shard and remove the class directory.
    ///
    /// Every shard is attempted even if an earlier one fails; the first
    /// failure is returned and the call can be retried. Dropping twice is a
    /// no-op. The handle must not be used for anything else afterwards.
    pub async fn drop_index(&self) -> Result<()> {
        let shards: Vec<Arc<Shard>> = self.ordered_shards().cloned().collect();
        let storage = self.storage.clone();
        let class = self.config.class_name.clone();

        tokio::spawn(async move {
            let mut first_error = None;
            for shard in shards {
                if let Err(e) = shard.drop_shard().await {
                    tracing::error!(class = %class, shard = %shard.name(), error = %e, "failed to drop shard");
                    first_error.get_or_insert(e);
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }

            storage.remove_dir(&class).await?;
            tracing::info!(class = %class, "index dropped");
            Ok::<(), VaultError>(())
        })
        .await?
    }

    /// Flush and close every shard without deleting data
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for shard in self.ordered_shards() {
            if let Err(e) = shard.close().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Make every acknowledged write of every shard durable
    pub async fn flush(&self) -> Result<()> {
        for shard in self.ordered_shards() {
            shard.flush().await?;
        }
        Ok(())
    }

    /// `k` nearest objects across all shards, closest first
    pub async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<(StoredObject, f32)>> {
        if query.is_empty() {
            return Err(VaultError::validation("query vector is empty"));
        }
        match self.vector_dims().await {
            Some(dims) if dims != query.len() => {
                return Err(VaultError::dimension_mismatch(dims, query.len()))
            }
            None => return Ok(Vec::new()),
            Some(_) => {}
        }

        let mut results = Vec::new();
        for shard in self.ordered_shards() {
            results.extend(shard.vector_search(query, k).await?);
        }
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        results.truncate(k);
        Ok(results)
    }

    /// Objects across all shards whose property `name` equals `value`
    pub async fn find_by_property(&self, name: &str, value: &PropertyValue) -> Result<Vec<StoredObject>> {
        let mut results = Vec::new();
        for shard in self.ordered_shards() {
            results.extend(shard.find_by_property(name, value).await?);
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    /// Objects across all shards whose property `name` lies within the
    /// bounds, by id
    pub async fn filter_range(
        &self,
        name: &str,
        lower: Bound<&PropertyValue>,
        upper: Bound<&PropertyValue>,
    ) -> Result<Vec<StoredObject>> {
        let mut results = Vec::new();
        for shard in self.ordered_shards() {
            results.extend(shard.filter_range(name, lower, upper).await?);
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    /// Objects across all shards without (`is_null`) or with a value for
    /// `name`, by id
    pub async fn filter_null(&self, name: &str, is_null: bool) -> Result<Vec<StoredObject>> {
        let mut results = Vec::new();
        for shard in self.ordered_shards() {
            results.extend(shard.filter_null(name, is_null).await?);
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    /// Mean length of the text values of `name` across all shards
    pub async fn property_length_mean(&self, name: &str) -> Result<Option<f64>> {
        let (mut sum, mut count) = (0u64, 0u64);
        for shard in self.ordered_shards() {
            let (shard_sum, shard_count) = shard.property_lengths(name).await?;
            sum += shard_sum;
            count += shard_count;
        }
        Ok((count > 0).then(|| sum as f64 / count as f64))
    }

    /// Number of objects across all shards
    pub async fn object_count(&self) -> Result<usize> {
        let mut total = 0;
        for shard in self.ordered_shards() {
            total += shard.object_count().await?;
        }
        Ok(total)
    }

    /// Every file persisted for this class, relative to the root path
    pub async fn artifacts(&self) -> Result<Vec<String>> {
        let mut artifacts = Vec::new();
        for shard in self.ordered_shards() {
            artifacts.extend(shard.artifacts().await?);
        }
        artifacts.sort();
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;

    fn schema() -> ClassSchema {
        ClassSchema::new("Article").with_property("title", DataType::Text)
    }

    #[tokio::test]
    async fn test_construct_creates_shards() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::new(
            IndexConfig::new(dir.path(), "Article"),
            ShardingState::with_count(3),
            schema(),
        )
        .await
        .unwrap();

        assert_eq!(index.shard_names(), vec!["shard_0", "shard_1", "shard_2"]);
        assert_eq!(index.artifacts().await.unwrap().len(), 15);
        assert_eq!(index.object_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_routing_spreads_objects() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let index = Index::new(
            IndexConfig::new(dir.path(), "Article"),
            ShardingState::with_count(2),
            schema(),
        )
        .await
        .unwrap();

        let mut ids = Vec::new();
        for i in 0..20 {
            let object = StoredObject::new("Article", Uuid::new_v4())
                .with_vector(vec![i as f32, 1.0])
                .with_property("title", format!("title {}", i));
            ids.push(object.id);
            index.put_object(&ctx, object).await.unwrap();
        }

        assert_eq!(index.object_count().await.unwrap(), 20);
        for id in &ids {
            assert!(index.object_by_id(&ctx, id).await.unwrap().is_some());
        }
        for name in index.shard_names() {
            assert!(index.shard(&name).unwrap().object_count().await.unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn test_vector_search_merges_shards() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let config = IndexConfig::new(dir.path(), "Article").with_vector_index(
            crate::vector_index::VectorIndexConfig::new(crate::vector_index::DistanceMetric::L2Squared),
        );
        let index = Index::new(config, ShardingState::with_count(4), schema())
            .await
            .unwrap();

        for i in 0..16 {
            let object = StoredObject::new("Article", Uuid::new_v4()).with_vector(vec![i as f32]);
            index.put_object(&ctx, object).await.unwrap();
        }

        let results = index.vector_search(&[3.2], 3).await.unwrap();
        let values: Vec<f32> = results.iter().map(|(o, _)| o.vector[0]).collect();
        assert_eq!(values, vec![3.0, 4.0, 2.0]);
        assert!(index.vector_search(&[], 3).await.is_err());
    }

    #[tokio::test]
    async fn test_add_property_updates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let index = Index::new(
            IndexConfig::new(dir.path(), "Article"),
            ShardingState::with_count(2),
            schema(),
        )
        .await
        .unwrap();

        index
            .add_property(&ctx, PropertyDef::new("views", DataType::Int))
            .await
            .unwrap();
        assert!(index.schema().property("views").is_some());

        assert!(matches!(
            index
                .add_property(&ctx, PropertyDef::new("views", DataType::Text))
                .await,
            Err(VaultError::SchemaConflict { .. })
        ));
        assert!(index
            .add_property(&ctx, PropertyDef::new(UUID_PROPERTY, DataType::Uuid))
            .await
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test]
    async fn test_from_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StaticSchema::new().with_class(schema(), ShardingState::single("only"));

        let index = Index::from_provider(IndexConfig::new(dir.path(), "Article"), &provider)
            .await
            .unwrap();
        assert_eq!(index.shard_names(), vec!["only"]);

        let missing = Index::from_provider(IndexConfig::new(dir.path(), "Missing"), &provider).await;
        assert!(matches!(missing, Err(VaultError::Initialization { .. })));
    }

    #[tokio::test]
    async fn test_construct_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::new(dir.path(), "Article");

        let empty = Index::new(config.clone(), ShardingState::new(Vec::<String>::new()), schema()).await;
        assert!(matches!(empty, Err(VaultError::Initialization { .. })));

        let wrong_class = Index::new(config.clone(), ShardingState::single("s"), ClassSchema::new("Other")).await;
        assert!(matches!(wrong_class, Err(VaultError::Initialization { .. })));

        let bad_shard = Index::new(config, ShardingState::single("../escape"), schema()).await;
        assert!(matches!(bad_shard, Err(VaultError::Initialization { .. })));
    }

    #[tokio::test]
    async fn test_root_path_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();

        let result = Index::new(IndexConfig::new(&file, "Article"), ShardingState::single("s"), schema()).await;
        assert!(matches!(result, Err(VaultError::Initialization { .. })));
    }
}
