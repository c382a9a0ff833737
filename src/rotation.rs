//! Round-robin rotation over a pool of API keys.
//!
//! The pool is loaded lazily, once per [`ResourceRotator`], from a
//! [`ResourceSource`]. After that its membership never changes; only the
//! allocation counter and the per-key usage counters move, and both are
//! atomics so concurrent workers never lose an update.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::error::{DocflowError, Result};

/// A credential handed out by the rotator.
///
/// Cheap to clone. `Debug` and `Display` only show the last four characters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Resource(Arc<str>);

impl Resource {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// The raw credential. Only pass this to the remote client.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted label, e.g. `…a1b2`.
    pub fn label(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({})", self.label())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Where the pool's members come from. Called at most once per rotator.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn load(&self) -> Result<Vec<String>>;
}

/// Keys supplied directly, e.g. from `DOCFLOW_API_KEYS`.
pub struct StaticKeys(Vec<String>);

impl StaticKeys {
    pub fn new(keys: Vec<String>) -> Self {
        Self(keys)
    }
}

#[async_trait]
impl ResourceSource for StaticKeys {
    async fn load(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Keys read from a CSV file with an `api_key` header column.
///
/// Only the key column is decoded: UTF-8 first, ISO-8859-1 otherwise, so a
/// stray byte in an unrelated column never empties the pool.
pub struct CsvKeyFile {
    path: PathBuf,
}

impl CsvKeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

#[async_trait]
impl ResourceSource for CsvKeyFile {
    async fn load(&self) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| DocflowError::Storage {
                locator: self.path.display().to_string(),
                source,
            })?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(bytes.as_slice());
        let column = reader
            .byte_headers()?
            .iter()
            .position(|h| decode_field(h) == "api_key")
            .ok_or_else(|| {
                DocflowError::KeySource(format!("{}: missing api_key column", self.path.display()))
            })?;
        let mut keys = Vec::new();
        for row in reader.byte_records() {
            if let Some(field) = row?.get(column) {
                keys.push(decode_field(field));
            }
        }
        Ok(keys)
    }
}

/// Loaded pool state: immutable members plus atomic counters.
pub struct ResourcePool {
    members: Vec<Resource>,
    counter: AtomicU64,
    usage: Vec<AtomicU64>,
}

impl ResourcePool {
    /// Build a pool from raw identifiers. Blank entries are skipped and
    /// duplicates keep their first position.
    pub fn new(ids: Vec<String>) -> Self {
        let mut members: Vec<Resource> = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.trim();
            if id.is_empty() || members.iter().any(|m| m.expose() == id) {
                continue;
            }
            members.push(Resource::new(id));
        }
        let usage = members.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            members,
            counter: AtomicU64::new(0),
            usage,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `pool[counter++ % len]`, or `None` for an empty pool.
    pub fn next(&self) -> Option<(usize, Resource)> {
        if self.members.is_empty() {
            return None;
        }
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        let index = (ticket % self.members.len() as u64) as usize;
        self.usage[index].fetch_add(1, Ordering::Relaxed);
        Some((index, self.members[index].clone()))
    }

    /// Total allocations so far.
    pub fn allocations(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Per-member usage counts, in pool order.
    pub fn usage(&self) -> Vec<(Resource, u64)> {
        self.members
            .iter()
            .zip(&self.usage)
            .map(|(m, u)| (m.clone(), u.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Lazily-loaded, concurrency-safe round-robin allocator.
pub struct ResourceRotator {
    source: Box<dyn ResourceSource>,
    pool: OnceCell<ResourcePool>,
}

impl ResourceRotator {
    pub fn new(source: impl ResourceSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn ResourceSource>) -> Self {
        Self {
            source,
            pool: OnceCell::new(),
        }
    }

    /// Allocate the next credential, loading the pool on first use.
    ///
    /// Returns `None` when the pool is empty, including after a failed load;
    /// a failed load is logged and not retried.
    pub async fn acquire(&self) -> Option<Resource> {
        let pool = self.pool().await;
        let (index, resource) = pool.next()?;
        debug!(index, pool_size = pool.len(), "allocated API key");
        Some(resource)
    }

    /// Number of members, loading the pool if needed.
    pub async fn pool_size(&self) -> usize {
        self.pool().await.len()
    }

    /// Usage counts so far; empty if the pool was never loaded.
    pub fn usage(&self) -> Vec<(Resource, u64)> {
        self.pool.get().map(ResourcePool::usage).unwrap_or_default()
    }

    async fn pool(&self) -> &ResourcePool {
        self.pool
            .get_or_init(|| async {
                match self.source.load().await {
                    Ok(ids) => {
                        let pool = ResourcePool::new(ids);
                        info!(keys = pool.len(), "loaded API key pool");
                        pool
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            "failed to load API keys; rotation disabled for this process"
                        );
                        ResourcePool::empty()
                    }
                }
            })
            .await
    }
}
