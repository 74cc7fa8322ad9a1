//! Vector index trait abstraction
//!
//! Provides a common interface for nearest-neighbor index implementations so
//! a shard can swap the structure without touching its write path.

use async_trait::async_trait;
use uuid::Uuid;

use crate::storage::{StorageResult, SubStore};

/// Common interface for all vector index implementations
#[async_trait]
pub trait VectorIndex: SubStore {
    /// Insert or replace the vector of `id`
    ///
    /// The first insert into an empty index fixes its dimensionality.
    async fn insert(&self, id: Uuid, vector: &[f32]) -> StorageResult<()>;

    /// Remove the vector of `id`. Returns whether one was present.
    async fn delete(&self, id: &Uuid) -> StorageResult<bool>;

    /// Stored vector of `id` (a copy)
    fn get(&self, id: &Uuid) -> Option<Vec<f32>>;

    /// Search for k nearest neighbors
    ///
    /// # Returns
    /// Vector of (id, distance) pairs, sorted by distance ascending. Empty if
    /// the query does not match the index dimensionality.
    fn search(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)>;

    /// Dimensionality, once fixed by the first insert
    fn dims(&self) -> Option<usize>;

    /// Get the number of live vectors
    fn len(&self) -> usize;

    /// Check if the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
