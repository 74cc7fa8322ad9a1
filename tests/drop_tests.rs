//! Drop and recreate tests
//!
//! Verifies the on-disk footprint of an index across its lifecycle:
//! - An empty shard persists a fixed set of files
//! - Dropping removes every file of the class
//! - Constructing again at the same root yields the same fresh layout
//! - Nothing written before a drop is readable afterwards

mod common;

use common::*;
use shardvault::{ClassSchema, ShardStatus, MIN_SHARD_ARTIFACTS};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CLASS: &str = "deletetest";

fn test_vector() -> Vec<f32> {
    vec![0.1, 0.2, 0.01, 0.2]
}

fn first_id() -> Uuid {
    Uuid::parse_str("1295c052-263d-4aae-99dd-920c5a370d06").unwrap()
}

fn second_id() -> Uuid {
    Uuid::parse_str("1295c052-263d-4aae-99dd-920c5a370d07").unwrap()
}

// =============================================================================
// Footprint
// =============================================================================

#[tokio::test]
async fn test_empty_index_footprint_then_drop() {
    let dir = temp_root();

    let index = open_index(dir.path(), ClassSchema::new(CLASS), 1).await;
    let before = class_artifacts(dir.path(), CLASS);
    assert_eq!(before.len(), MIN_SHARD_ARTIFACTS);
    assert_eq!(index.artifacts().await.unwrap(), before);

    index.drop_index().await.unwrap();
    assert!(class_artifacts(dir.path(), CLASS).is_empty());
    assert!(!dir.path().join(CLASS).exists());
    drop(index);

    let index = open_index(dir.path(), ClassSchema::new(CLASS), 1).await;
    let after = class_artifacts(dir.path(), CLASS);
    assert_eq!(after.len(), MIN_SHARD_ARTIFACTS);
    assert_eq!(before, after, "recreated index must persist the same files");

    index.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_footprint_scales_with_shard_count() {
    let dir = temp_root();

    for shards in [1, 3, 5] {
        let class = format!("footprint{}", shards);
        let index = open_index(dir.path(), ClassSchema::new(&class), shards).await;
        assert_eq!(
            class_artifacts(dir.path(), &class).len(),
            MIN_SHARD_ARTIFACTS * shards
        );

        index.drop_index().await.unwrap();
        assert!(class_artifacts(dir.path(), &class).is_empty());
    }
}

#[tokio::test]
async fn test_drop_leaves_other_classes_alone() {
    let dir = temp_root();
    let ctx = CancellationToken::new();

    let kept = open_index(dir.path(), named_schema("Kept"), 2).await;
    let dropped = open_index(dir.path(), named_schema(CLASS), 2).await;

    let id = Uuid::new_v4();
    kept.put_object(&ctx, named_object("Kept", id, "stays", test_vector()))
        .await
        .unwrap();

    dropped.drop_index().await.unwrap();

    assert!(class_artifacts(dir.path(), CLASS).is_empty());
    assert_eq!(
        class_artifacts(dir.path(), "Kept").len(),
        MIN_SHARD_ARTIFACTS * 2
    );
    assert!(kept.object_by_id(&ctx, &id).await.unwrap().is_some());
}

// =============================================================================
// Recreate
// =============================================================================

#[tokio::test]
async fn test_recreate_does_not_resurrect_objects() {
    let dir = temp_root();
    let ctx = CancellationToken::new();

    let index = open_index(dir.path(), named_schema(CLASS), 1).await;
    for (id, name) in [(first_id(), "first"), (second_id(), "second")] {
        index
            .put_object(&ctx, named_object(CLASS, id, name, test_vector()))
            .await
            .unwrap();
    }
    for id in [first_id(), second_id()] {
        assert!(index.object_by_id(&ctx, &id).await.unwrap().is_some());
    }

    index.drop_index().await.unwrap();
    drop(index);

    let index = open_index(dir.path(), named_schema(CLASS), 1).await;
    for id in [first_id(), second_id()] {
        assert!(
            index.object_by_id(&ctx, &id).await.unwrap().is_none(),
            "object {} survived the drop",
            id
        );
    }
    assert_eq!(index.object_count().await.unwrap(), 0);
    assert!(index.vector_search(&test_vector(), 10).await.unwrap().is_empty());

    for (id, name) in [(first_id(), "first"), (second_id(), "second")] {
        index
            .put_object(&ctx, named_object(CLASS, id, name, test_vector()))
            .await
            .unwrap();
    }
    for id in [first_id(), second_id()] {
        let found = index.object_by_id(&ctx, &id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.vector, test_vector());
    }
}

#[tokio::test]
async fn test_recreate_matches_brand_new_index() {
    let fresh_dir = temp_root();
    let reused_dir = temp_root();
    let ctx = CancellationToken::new();

    let fresh = open_index(fresh_dir.path(), named_schema(CLASS), 3).await;
    let expected = class_artifacts(fresh_dir.path(), CLASS);

    let index = open_index(reused_dir.path(), named_schema(CLASS), 3).await;
    for i in 0..50u64 {
        let object = named_object(CLASS, Uuid::new_v4(), &format!("n{}", i), seeded_vector(4, i));
        index.put_object(&ctx, object).await.unwrap();
    }
    index.drop_index().await.unwrap();
    drop(index);

    let _recreated = open_index(reused_dir.path(), named_schema(CLASS), 3).await;
    assert_eq!(class_artifacts(reused_dir.path(), CLASS), expected);

    fresh.shutdown().await.unwrap();
}

// =============================================================================
// Drop from every live status
// =============================================================================

#[tokio::test]
async fn test_drop_read_only_index() {
    let dir = temp_root();
    let ctx = CancellationToken::new();

    let index = open_index(dir.path(), named_schema(CLASS), 2).await;
    for i in 0..10u64 {
        let object = named_object(CLASS, Uuid::new_v4(), "x", seeded_vector(4, i));
        index.put_object(&ctx, object).await.unwrap();
    }

    for name in index.shard_names() {
        index
            .update_shard_status(&ctx, &name, ShardStatus::ReadOnly)
            .await
            .unwrap();
    }

    index.drop_index().await.unwrap();
    assert!(class_artifacts(dir.path(), CLASS).is_empty());
    for name in index.shard_names() {
        assert_eq!(index.shard_status(&name).await.unwrap(), ShardStatus::Dropped);
    }
}

#[tokio::test]
async fn test_drop_mixed_status_index() {
    let dir = temp_root();
    let ctx = CancellationToken::new();

    let index = open_index(dir.path(), named_schema(CLASS), 2).await;
    index
        .update_shard_status(&ctx, "shard_1", ShardStatus::ReadOnly)
        .await
        .unwrap();

    index.drop_index().await.unwrap();
    assert!(class_artifacts(dir.path(), CLASS).is_empty());
}

#[tokio::test]
async fn test_drop_twice_is_noop() {
    let dir = temp_root();

    let index = open_index(dir.path(), named_schema(CLASS), 2).await;
    index.drop_index().await.unwrap();
    index.drop_index().await.unwrap();
    assert!(class_artifacts(dir.path(), CLASS).is_empty());
}

#[tokio::test]
async fn test_operations_after_drop_fail() {
    let dir = temp_root();
    let ctx = CancellationToken::new();

    let index = open_index(dir.path(), named_schema(CLASS), 1).await;
    index.drop_index().await.unwrap();

    let put = index
        .put_object(&ctx, named_object(CLASS, first_id(), "late", test_vector()))
        .await;
    assert!(matches!(put, Err(shardvault::VaultError::ShardDropped { .. })));

    let read = index.object_by_id(&ctx, &first_id()).await;
    assert!(matches!(read, Err(shardvault::VaultError::ShardDropped { .. })));

    let status = index
        .update_shard_status(&ctx, "shard_0", ShardStatus::Ready)
        .await;
    assert!(matches!(status, Err(shardvault::VaultError::ShardDropped { .. })));

    assert!(class_artifacts(dir.path(), CLASS).is_empty());
}

#[tokio::test]
async fn test_drop_after_shutdown_removes_files() {
    let dir = temp_root();
    let ctx = CancellationToken::new();

    let index = open_index(dir.path(), named_schema(CLASS), 2).await;
    index
        .put_object(&ctx, named_object(CLASS, first_id(), "first", test_vector()))
        .await
        .unwrap();
    index.shutdown().await.unwrap();

    index.drop_index().await.unwrap();
    assert!(class_artifacts(dir.path(), CLASS).is_empty());
}
