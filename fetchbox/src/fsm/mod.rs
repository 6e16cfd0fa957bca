//! The reply state machine.
//!
//! One driver task per reply owns the request lifecycle: cache consultation,
//! transport dispatch on the worker thread, streaming into both the consumer
//! buffer and the cache writer, and terminal-state bookkeeping.

mod driver;
mod handle;
mod states;

pub use handle::ReplyHandle;
pub use states::ReplyState;

pub(crate) use driver::{EngineServices, ReplyDriver};
pub(crate) use handle::new_reply_channel;

use bytes::Bytes;
use futures::stream::BoxStream;

/// Upload body attached to an operation.
pub enum UploadBody {
    /// Fixed-size, replayable body: dispatch can start immediately and the
    /// body can be resent on retries.
    Full(Bytes),
    /// Sequential, non-resettable body: fully drained into an internal
    /// buffer (the `Buffering` state) before any transport is started, so
    /// retries and redirects can replay it.
    Sequential(BoxStream<'static, Bytes>),
}

impl std::fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(b) => f.debug_tuple("UploadBody::Full").field(&b.len()).finish(),
            Self::Sequential(_) => f.write_str("UploadBody::Sequential"),
        }
    }
}
