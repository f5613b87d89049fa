//! Tests for builder modules

use prometheus_planboard::builders::build_store;
use prometheus_planboard::config::StorageBackendConfig;
use prometheus_planboard::core::BoardStore;

#[tokio::test]
async fn test_build_in_memory_store() {
    let store = build_store(&StorageBackendConfig::InMemory).unwrap();
    assert!(store.list_boards().await.unwrap().is_empty());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_build_sqlite_store_creates_parent_dirs() {
    let dir = std::env::temp_dir().join(format!("planboard-builder-{}", uuid::Uuid::new_v4()));
    let path = dir.join("nested").join("board.db");
    let store = build_store(&StorageBackendConfig::Sqlite { path: path.clone() }).unwrap();
    assert!(store.list_boards().await.unwrap().is_empty());
    assert!(path.exists());
    drop(store);
    let _ = std::fs::remove_dir_all(dir);
}

#[cfg(not(feature = "sqlite"))]
#[test]
fn test_sqlite_store_requires_feature() {
    let err = build_store(&StorageBackendConfig::Sqlite {
        path: "board.db".into(),
    })
    .err()
    .expect("feature disabled");
    assert!(err.to_string().contains("sqlite"));
}
