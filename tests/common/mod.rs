// Shared helpers for the integration tests
// Every scenario runs once per storage engine

use std::future::Future;
use std::sync::Arc;

use tempfile::TempDir;
use trellis::persistence::{MemorySession, RocksDbSession, StorageSession};

/// Run `scenario` against the in-memory engine, then against RocksDB
pub async fn each_engine<F, Fut>(scenario: F)
where
    F: Fn(&'static str, Arc<dyn StorageSession>) -> Fut,
    Fut: Future<Output = ()>,
{
    let memory: Arc<dyn StorageSession> = Arc::new(MemorySession::new());
    scenario("memory", memory).await;

    let tmp_dir = TempDir::new().unwrap();
    let embedded: Arc<dyn StorageSession> =
        Arc::new(RocksDbSession::open(tmp_dir.path()).unwrap());
    scenario("embedded", embedded.clone()).await;
    embedded.close().await.unwrap();
}
