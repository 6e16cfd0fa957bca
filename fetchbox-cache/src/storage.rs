//! The cache storage protocol.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use fetchbox_core::CacheMetaData;
use futures::stream::BoxStream;
use http::Uri;

/// Streamed cached content, delivered as body-sized chunks.
pub type ContentStream = BoxStream<'static, Bytes>;

/// An open write handle produced by [`NetworkCache::prepare`].
///
/// Body chunks accumulate in the writer; [`NetworkCache::insert`] commits
/// metadata and content together. Dropping a writer without inserting it
/// cancels the write and must never disturb previously committed entries.
#[derive(Debug)]
pub struct CacheWriter {
    meta: CacheMetaData,
    body: BytesMut,
}

impl CacheWriter {
    /// Creates a writer for `meta` with an empty body.
    pub fn new(meta: CacheMetaData) -> Self {
        Self {
            meta,
            body: BytesMut::new(),
        }
    }

    /// Appends a body chunk.
    pub fn write(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    /// Total bytes written so far.
    pub fn written(&self) -> u64 {
        self.body.len() as u64
    }

    /// The metadata this writer was prepared with.
    pub fn meta(&self) -> &CacheMetaData {
        &self.meta
    }

    /// Consumes the writer, returning metadata and body.
    pub fn into_parts(self) -> (CacheMetaData, Bytes) {
        (self.meta, self.body.freeze())
    }
}

/// Abstract cache consulted and populated by the reply engine.
///
/// Implementations signal "not cached" with an invalid [`CacheMetaData`] and
/// refuse writes by returning `None` from [`prepare`](Self::prepare); the
/// engine treats every failure as "cache disabled for this reply" and keeps
/// going.
#[async_trait]
pub trait NetworkCache: Send + Sync {
    /// Looks up the metadata stored for `url`. An invalid instance means the
    /// entry is not cached.
    async fn meta_data(&self, url: &Uri) -> CacheMetaData;

    /// Refreshes the stored metadata of an existing entry without rewriting
    /// its content. Used after a 304 revalidation.
    async fn update_meta_data(&self, meta: &CacheMetaData);

    /// Opens the cached content of `url` for reading. `None` means a miss or
    /// an internal error; the caller owns the returned stream.
    async fn data(&self, url: &Uri) -> Option<ContentStream>;

    /// Begins writing a new entry. `None` means the backend refuses to cache
    /// (invalid metadata, capacity, policy).
    async fn prepare(&self, meta: CacheMetaData) -> Option<CacheWriter>;

    /// Commits a fully written entry previously returned by
    /// [`prepare`](Self::prepare).
    async fn insert(&self, writer: CacheWriter);

    /// Evicts the entry for `url`. Returns `true` when something was removed.
    async fn remove(&self, url: &Uri) -> bool;

    /// Implementation-defined cost metric of the current contents.
    async fn cache_size(&self) -> u64;

    /// Evicts everything.
    async fn clear(&self);
}
