//! Transport backends.
//!
//! A transport backend performs the actual I/O for one operation on the
//! manager's worker thread and reports back through a typed event channel.
//! Decisions that need the owning side (credentials) travel as a synchronous
//! round-trip: the backend blocks on a oneshot until the reply engine posts
//! its answer.

use async_trait::async_trait;
use bytes::Bytes;
use fetchbox_core::{HeaderList, Request};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::auth::{Authenticator, Proxy};
use crate::error::ReplyError;

/// Response head reported by a transport.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// HTTP-ish status code (synthesized as 200 for non-HTTP backends).
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Raw response headers.
    pub headers: HeaderList,
    /// `true` when the server advertises byte-range continuation.
    pub supports_resume: bool,
}

impl ResponseHead {
    /// A plain `200 OK` head with the given headers.
    pub fn ok(headers: HeaderList) -> Self {
        Self {
            status: 200,
            reason: "OK".to_string(),
            headers,
            supports_resume: false,
        }
    }
}

/// Authentication challenge surfaced by a transport.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// Challenge data (realm, any previously tried identity).
    pub authenticator: Authenticator,
    /// Set when the challenge came from a proxy rather than the origin.
    pub proxy: Option<Proxy>,
}

/// Typed messages a transport sends to its reply.
///
/// Delivered in issuance order per operation; `Error` and `Finished` are
/// each sent at most once.
#[derive(Debug)]
pub enum TransportEvent {
    /// Response head received.
    Metadata(ResponseHead),
    /// One chunk of downstream data.
    Data(Bytes),
    /// Download progress.
    Progress {
        /// Bytes received so far.
        received: u64,
        /// Total expected bytes, when known.
        total: Option<u64>,
    },
    /// The transport needs credentials; the reply engine answers through the
    /// responder while the transport waits.
    AuthRequired {
        /// Challenge details.
        challenge: AuthChallenge,
        /// Decision channel; `None` means "no credentials available".
        responder: oneshot::Sender<Option<Authenticator>>,
    },
    /// No network session is available yet; the operation will be retried.
    SessionUnavailable,
    /// Connectivity returned after `SessionUnavailable`.
    SessionReady,
    /// The network path changed mid-transfer.
    PathChanged,
    /// Terminal failure.
    Error(ReplyError),
    /// Normal completion.
    Finished,
}

/// Everything a backend needs to run one operation.
pub struct TransportContext {
    /// The request being performed (revalidation and range headers already
    /// applied by the engine).
    pub request: Request,
    /// Buffered upload body, when the operation carries one.
    pub upload: Option<Bytes>,
    /// Event channel back to the reply engine.
    pub events: mpsc::UnboundedSender<TransportEvent>,
    /// Remaining consumer read-buffer headroom in bytes; `u64::MAX` means
    /// unlimited. Backends pause delivery while this reads zero.
    pub read_window: watch::Receiver<u64>,
}

impl TransportContext {
    /// Waits until the consumer has buffer headroom again.
    pub async fn wait_for_window(&mut self) {
        while *self.read_window.borrow() == 0 {
            if self.read_window.changed().await.is_err() {
                // reply went away; the send after this will fail and stop us
                return;
            }
        }
    }
}

/// One network/file/data operation.
///
/// `open` consumes the backend and drives the operation to completion,
/// reporting through `ctx.events`. Resume support is negotiated before
/// `open`: the engine checks [`can_resume`](Self::can_resume) and calls
/// [`set_resume_offset`](Self::set_resume_offset) when it restarts an
/// interrupted transfer.
#[async_trait]
pub trait TransportBackend: Send + 'static {
    /// Runs the operation.
    async fn open(self: Box<Self>, ctx: TransportContext);

    /// Whether this backend class can continue from a byte offset.
    fn can_resume(&self) -> bool {
        false
    }

    /// Sets the offset to continue from on the next `open`.
    fn set_resume_offset(&mut self, _offset: u64) {}
}

/// Creates transport backends for the URL schemes it recognizes.
pub trait TransportFactory: Send + Sync {
    /// Returns a backend for `request`, or `None` when the scheme is not
    /// handled by this factory.
    fn create(&self, request: &Request) -> Option<Box<dyn TransportBackend>>;
}

const FILE_CHUNK_SIZE: usize = 16 * 1024;

/// Backend serving `file://` URLs from the local filesystem.
pub struct FileBackend {
    resume_offset: u64,
}

impl FileBackend {
    /// Creates a file backend.
    pub fn new() -> Self {
        Self { resume_offset: 0 }
    }

    async fn run(ctx: &mut TransportContext, resume_offset: u64) -> Result<(), ReplyError> {
        let path = ctx.request.url().path().to_string();
        let mut file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        if resume_offset > 0 {
            use tokio::io::AsyncSeekExt;
            file.seek(std::io::SeekFrom::Start(resume_offset)).await?;
        }

        let mut headers = HeaderList::new();
        headers.append(
            &b"Content-Length"[..],
            Bytes::from((len - resume_offset).to_string()),
        );
        let mut head = ResponseHead::ok(headers);
        head.supports_resume = true;
        let _ = ctx.events.send(TransportEvent::Metadata(head));

        let mut received = resume_offset;
        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        loop {
            ctx.wait_for_window().await;
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            received += n as u64;
            let chunk = Bytes::copy_from_slice(&buf[..n]);
            if ctx.events.send(TransportEvent::Data(chunk)).is_err() {
                debug!(path, "reply dropped, stopping file transfer");
                return Ok(());
            }
            let _ = ctx.events.send(TransportEvent::Progress {
                received,
                total: Some(len),
            });
        }
        Ok(())
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportBackend for FileBackend {
    async fn open(self: Box<Self>, mut ctx: TransportContext) {
        match Self::run(&mut ctx, self.resume_offset).await {
            Ok(()) => {
                let _ = ctx.events.send(TransportEvent::Finished);
            }
            Err(err) => {
                let _ = ctx.events.send(TransportEvent::Error(err));
            }
        }
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn set_resume_offset(&mut self, offset: u64) {
        self.resume_offset = offset;
    }
}

/// Factory for [`FileBackend`].
pub struct FileTransportFactory;

impl TransportFactory for FileTransportFactory {
    fn create(&self, request: &Request) -> Option<Box<dyn TransportBackend>> {
        (request.url().scheme_str() == Some("file")).then(|| {
            Box::new(FileBackend::new()) as Box<dyn TransportBackend>
        })
    }
}

/// Backend decoding `data:` URLs without touching the network.
pub struct DataBackend;

impl DataBackend {
    fn decode(url_text: &str) -> Result<(String, Bytes), ReplyError> {
        let rest = url_text
            .strip_prefix("data:")
            .ok_or(ReplyError::ProtocolFailure)?;
        let (header, payload) = rest.split_once(',').ok_or(ReplyError::ProtocolFailure)?;

        let (media_type, is_base64) = match header.strip_suffix(";base64") {
            Some(mt) => (mt, true),
            None => (header, false),
        };
        let media_type = if media_type.is_empty() {
            "text/plain;charset=US-ASCII".to_string()
        } else {
            media_type.to_string()
        };

        let bytes = if is_base64 {
            decode_base64(payload).ok_or(ReplyError::ProtocolFailure)?
        } else {
            percent_decode(payload)
        };
        Ok((media_type, Bytes::from(bytes)))
    }
}

#[async_trait]
impl TransportBackend for DataBackend {
    async fn open(self: Box<Self>, ctx: TransportContext) {
        let url_text = ctx.request.url().to_string();
        match Self::decode(&url_text) {
            Ok((media_type, body)) => {
                let mut headers = HeaderList::new();
                headers.append(&b"Content-Type"[..], Bytes::from(media_type));
                headers.append(
                    &b"Content-Length"[..],
                    Bytes::from(body.len().to_string()),
                );
                let _ = ctx.events.send(TransportEvent::Metadata(ResponseHead::ok(headers)));
                let total = body.len() as u64;
                if !body.is_empty() {
                    let _ = ctx.events.send(TransportEvent::Data(body));
                }
                let _ = ctx.events.send(TransportEvent::Progress {
                    received: total,
                    total: Some(total),
                });
                let _ = ctx.events.send(TransportEvent::Finished);
            }
            Err(err) => {
                let _ = ctx.events.send(TransportEvent::Error(err));
            }
        }
    }
}

/// Factory for [`DataBackend`].
pub struct DataTransportFactory;

impl TransportFactory for DataTransportFactory {
    fn create(&self, request: &Request) -> Option<Box<dyn TransportBackend>> {
        (request.url().scheme_str() == Some("data"))
            .then(|| Box::new(DataBackend) as Box<dyn TransportBackend>)
    }
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn decode_base64(input: &str) -> Option<Vec<u8>> {
    fn value(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let cleaned: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b'=')
        .collect();
    let mut out = Vec::with_capacity(cleaned.len() * 3 / 4);
    for chunk in cleaned.chunks(4) {
        if chunk.len() == 1 {
            return None;
        }
        let mut acc: u32 = 0;
        for &c in chunk {
            acc = (acc << 6) | value(c)? as u32;
        }
        acc <<= 6 * (4 - chunk.len()) as u32;
        let produced = chunk.len() - 1;
        let all = acc.to_be_bytes();
        out.extend_from_slice(&all[1..1 + produced]);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_decodes_standard_alphabet() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("aGVsbG8h").unwrap(), b"hello!");
        assert_eq!(decode_base64("").unwrap(), b"");
        assert!(decode_base64("a").is_none());
        assert!(decode_base64("!!!!").is_none());
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("a%20b%2Fc"), b"a b/c");
        assert_eq!(percent_decode("plain"), b"plain");
        assert_eq!(percent_decode("bad%zz"), b"bad%zz");
        assert_eq!(percent_decode("trail%2"), b"trail%2");
    }

    #[test]
    fn data_url_decoding() {
        let (mt, body) = DataBackend::decode("data:text/plain,hello%20world").unwrap();
        assert_eq!(mt, "text/plain");
        assert_eq!(body, Bytes::from_static(b"hello world"));

        let (mt, body) = DataBackend::decode("data:;base64,aGk=").unwrap();
        assert_eq!(mt, "text/plain;charset=US-ASCII");
        assert_eq!(body, Bytes::from_static(b"hi"));

        assert!(DataBackend::decode("data:nocomma").is_err());
    }
}
