#![warn(missing_docs)]
//! # fetchbox-cache
//!
//! The cache storage protocol consumed by the fetchbox reply engine, and an
//! in-memory reference implementation.
//!
//! The [`NetworkCache`] trait is the whole contract between the engine and a
//! storage backend: metadata lookup and refresh, two-phase content writes
//! (`prepare` then `insert`), content reads as a byte stream, and
//! invalidation. How bytes are persisted is entirely the backend's business.

pub mod error;
pub mod memory;
pub mod storage;

pub use error::CacheError;
pub use memory::MemoryCache;
pub use storage::{CacheWriter, ContentStream, NetworkCache};
