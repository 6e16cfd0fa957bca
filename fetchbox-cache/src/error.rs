//! Error types for cache backends.

use thiserror::Error;

/// Error type for cache backend internals.
///
/// The protocol methods the engine calls return `Option`/`bool` so that any
/// backend failure degrades to "cache unusable for this reply"; this type
/// carries the diagnostics backends log before degrading.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Stored metadata could not be decoded.
    #[error("stored metadata is malformed")]
    MetaDecode,
}
