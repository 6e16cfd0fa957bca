use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use fetchbox_core::{AttributeMap, AttributeValue, HeaderList};
use tokio::sync::{mpsc, watch};

use crate::error::ReplyError;
use crate::fsm::ReplyState;

/// Mutable reply status shared between the driver task and the handle.
#[derive(Debug)]
pub(crate) struct ReplyInner {
    pub state: ReplyState,
    pub status: Option<u16>,
    pub reason: String,
    pub headers: HeaderList,
    pub attributes: AttributeMap,
    pub error: Option<ReplyError>,
    pub bytes_received: u64,
    pub bytes_total: Option<u64>,
}

/// State shared between a [`ReplyHandle`] and its driver task.
#[derive(Debug)]
pub(crate) struct ReplyShared {
    pub inner: Mutex<ReplyInner>,
    /// Bytes delivered to the handle's channel but not yet consumed.
    buffered: AtomicU64,
    /// Consumer-side buffer cap. Zero means unlimited.
    max_buffer: u64,
    /// Remaining read window advertised to the transport.
    window: watch::Sender<u64>,
    /// Consumer abort request, observed by the driver.
    abort: watch::Sender<bool>,
}

impl ReplyShared {
    pub fn state(&self) -> ReplyState {
        match self.inner.lock() {
            Ok(inner) => inner.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    pub fn with_inner<T>(&self, f: impl FnOnce(&mut ReplyInner) -> T) -> T {
        match self.inner.lock() {
            Ok(mut inner) => f(&mut inner),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Records `n` bytes handed to the consumer channel and shrinks the
    /// advertised window accordingly.
    pub fn buffered(&self, n: u64) {
        let total = self.buffered.fetch_add(n, Ordering::AcqRel) + n;
        self.publish_window(total);
    }

    /// Records `n` bytes taken out by the consumer and widens the window.
    pub fn consumed(&self, n: u64) {
        let total = self.buffered.fetch_sub(n, Ordering::AcqRel).saturating_sub(n);
        self.publish_window(total);
    }

    fn publish_window(&self, buffered: u64) {
        let window = if self.max_buffer == 0 {
            u64::MAX
        } else {
            self.max_buffer.saturating_sub(buffered)
        };
        self.window.send_replace(window);
    }
}

/// Creates the shared state and channels wiring a driver to its handle.
///
/// Returns the consumer handle, the shared state, the chunk sender the
/// driver feeds, the read-window receiver handed to transports, and the
/// abort-flag receiver the driver watches.
pub(crate) fn new_reply_channel(
    max_buffer: u64,
) -> (
    ReplyHandle,
    Arc<ReplyShared>,
    mpsc::UnboundedSender<Bytes>,
    watch::Receiver<u64>,
    watch::Receiver<bool>,
) {
    let initial_window = if max_buffer == 0 { u64::MAX } else { max_buffer };
    let (window_tx, window_rx) = watch::channel(initial_window);
    let (abort_tx, abort_rx) = watch::channel(false);
    let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(ReplyShared {
        inner: Mutex::new(ReplyInner {
            state: ReplyState::Idle,
            status: None,
            reason: String::new(),
            headers: HeaderList::new(),
            attributes: AttributeMap::new(),
            error: None,
            bytes_received: 0,
            bytes_total: None,
        }),
        buffered: AtomicU64::new(0),
        max_buffer,
        window: window_tx,
        abort: abort_tx,
    });
    let handle = ReplyHandle {
        shared: Arc::clone(&shared),
        chunks: chunks_rx,
    };
    (handle, shared, chunks_tx, window_rx, abort_rx)
}

/// Consumer-facing view of a reply.
///
/// Body data arrives as a stream of chunks; reading chunks releases
/// buffer space back to the transport when a buffer cap is configured.
/// Dropping the handle abandons the body but does not abort the
/// transfer; call [`abort`](ReplyHandle::abort) for that.
#[derive(Debug)]
pub struct ReplyHandle {
    shared: Arc<ReplyShared>,
    chunks: mpsc::UnboundedReceiver<Bytes>,
}

impl ReplyHandle {
    /// Receives the next body chunk, or `None` once the reply is complete
    /// and all buffered data has been read.
    pub async fn read_chunk(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.recv().await?;
        self.shared.consumed(chunk.len() as u64);
        Some(chunk)
    }

    /// Waits for completion and returns the whole body, or the terminal
    /// error if the reply failed.
    pub async fn wait(mut self) -> Result<Bytes, ReplyError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.read_chunk().await {
            body.extend_from_slice(&chunk);
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(body.freeze()),
        }
    }

    /// Requests cancellation. The driver fabricates an
    /// [`OperationCanceled`](ReplyError::OperationCanceled) error, runs the
    /// normal completion path once, and detaches the transport. Aborting a
    /// finished reply is a no-op.
    pub fn abort(&self) {
        self.shared.abort.send_replace(true);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReplyState {
        self.shared.state()
    }

    /// Whether the reply has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// HTTP status code, once response metadata has arrived.
    pub fn status(&self) -> Option<u16> {
        self.shared.with_inner(|inner| inner.status)
    }

    /// HTTP reason phrase, empty until metadata arrives.
    pub fn reason(&self) -> String {
        self.shared.with_inner(|inner| inner.reason.clone())
    }

    /// Response headers seen so far.
    pub fn headers(&self) -> HeaderList {
        self.shared.with_inner(|inner| inner.headers.clone())
    }

    /// Looks up a reply attribute by code.
    pub fn attribute(&self, code: u16) -> Option<AttributeValue> {
        self.shared.with_inner(|inner| inner.attributes.get(&code).cloned())
    }

    /// Terminal error, if the reply failed.
    pub fn error(&self) -> Option<ReplyError> {
        self.shared.with_inner(|inner| inner.error.clone())
    }

    /// Download progress as `(received, total)`. Total is `None` when the
    /// transport did not announce a length.
    pub fn progress(&self) -> (u64, Option<u64>) {
        self.shared
            .with_inner(|inner| (inner.bytes_received, inner.bytes_total))
    }
}
