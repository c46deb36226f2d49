#![allow(dead_code)]

use async_trait::async_trait;
use atrius_graph_views::memory::MemoryGraphStore;
use atrius_graph_views::{
    EngineConfig, GraphStore, RawRow, StoreError, TraversalQuery, ViewEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub const PATIENT: &str = "008288897179";

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/sample_graph.json")
}

pub async fn sample_store(decode_embedded: bool) -> MemoryGraphStore {
    MemoryGraphStore::load(fixture_path(), decode_embedded)
        .await
        .expect("sample graph loads")
}

pub async fn sample_engine() -> ViewEngine {
    let store = sample_store(false).await;
    ViewEngine::with_reference_catalog(Arc::new(store), EngineConfig::default()).unwrap()
}

/// Config with short deadlines and backoff for failure tests.
pub fn fast_config(retry_attempts: u32) -> EngineConfig {
    EngineConfig {
        deadline: Duration::from_millis(50),
        retry_attempts,
        retry_backoff: Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

/// Fails the first `failures` calls, then delegates to the wrapped store.
pub struct FlakyStore {
    inner: MemoryGraphStore,
    failures: AtomicU32,
    calls: AtomicU32,
    error: fn() -> StoreError,
}

impl FlakyStore {
    pub fn new(inner: MemoryGraphStore, failures: u32, error: fn() -> StoreError) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            error,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn execute(&self, query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err((self.error)());
        }
        self.inner.execute(query).await
    }
}

/// Never answers before `delay`.
pub struct SlowStore {
    pub delay: Duration,
    pub calls: AtomicU32,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl GraphStore for SlowStore {
    async fn execute(&self, _query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

/// Keeps the Cypher text and parameters of every query it receives.
#[derive(Default)]
pub struct RecordingStore {
    pub seen: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

#[async_trait]
impl GraphStore for RecordingStore {
    async fn execute(&self, query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError> {
        let params = query
            .params()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.seen
            .lock()
            .unwrap()
            .push((query.to_cypher(), params));
        Ok(Vec::new())
    }
}
