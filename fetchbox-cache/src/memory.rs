//! In-memory cache backend.
//!
//! The reference [`NetworkCache`] implementation: entries live in a
//! [`DashMap`] keyed by the normalized URL string, metadata stored in its
//! encoded form so the wire codec is exercised on every lookup.

use bytes::Bytes;
use dashmap::DashMap;
use fetchbox_core::CacheMetaData;
use futures::stream;
use http::Uri;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::storage::{CacheWriter, ContentStream, NetworkCache};

const DEFAULT_MAX_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
struct StoredEntry {
    meta: Bytes,
    body: Bytes,
}

impl StoredEntry {
    fn cost(&self) -> u64 {
        (self.meta.len() + self.body.len()) as u64
    }
}

/// In-memory [`NetworkCache`] with a total-size cap.
///
/// Not persistent and not shared across processes; intended as the default
/// backend and as the engine's test harness.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, StoredEntry>,
    max_size: u64,
}

impl MemoryCache {
    /// Creates a cache capped at 50 MiB.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_SIZE)
    }

    /// Creates a cache capped at `max_size` bytes of stored cost.
    pub fn with_max_size(max_size: u64) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
        }
    }

    fn key(url: &Uri) -> String {
        url.to_string()
    }

    fn total_cost(&self) -> u64 {
        self.entries.iter().map(|e| e.value().cost()).sum()
    }

    fn decode_meta(encoded: &Bytes) -> Result<CacheMetaData, CacheError> {
        let mut buf = encoded.clone();
        CacheMetaData::decode(&mut buf).ok_or(CacheError::MetaDecode)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NetworkCache for MemoryCache {
    async fn meta_data(&self, url: &Uri) -> CacheMetaData {
        match self.entries.get(&Self::key(url)) {
            Some(entry) => match Self::decode_meta(&entry.meta) {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(%url, %err, "treating entry as a miss");
                    CacheMetaData::default()
                }
            },
            None => CacheMetaData::default(),
        }
    }

    async fn update_meta_data(&self, meta: &CacheMetaData) {
        let key = Self::key(meta.url());
        match self.entries.get_mut(&key) {
            Some(mut entry) => entry.meta = meta.encode(),
            None => warn!(url = %meta.url(), "update_meta_data for unknown entry"),
        }
    }

    async fn data(&self, url: &Uri) -> Option<ContentStream> {
        let body = self.entries.get(&Self::key(url))?.body.clone();
        Some(Box::pin(stream::iter(if body.is_empty() {
            Vec::new()
        } else {
            vec![body]
        })))
    }

    async fn prepare(&self, meta: CacheMetaData) -> Option<CacheWriter> {
        if !meta.is_valid() || !meta.save_to_disk() {
            return None;
        }
        Some(CacheWriter::new(meta))
    }

    async fn insert(&self, writer: CacheWriter) {
        let (meta, body) = writer.into_parts();
        let key = Self::key(meta.url());
        let entry = StoredEntry {
            meta: meta.encode(),
            body,
        };
        if entry.cost() > self.max_size {
            debug!(url = %meta.url(), cost = entry.cost(), "entry exceeds cache capacity, dropped");
            return;
        }
        self.entries.insert(key, entry);

        // crude pressure valve: drop arbitrary entries until under the cap
        while self.total_cost() > self.max_size {
            let victim = match self.entries.iter().next() {
                Some(e) => e.key().clone(),
                None => break,
            };
            self.entries.remove(&victim);
        }
    }

    async fn remove(&self, url: &Uri) -> bool {
        self.entries.remove(&Self::key(url)).is_some()
    }

    async fn cache_size(&self) -> u64 {
        self.total_cost()
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}
