use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use fetchbox_cache::{CacheWriter, NetworkCache};
use fetchbox_core::freshness;
use fetchbox_core::headers::parse_option_header;
use fetchbox_core::{Attribute, AttributeValue, CacheLoadControl, CacheMetaData, Request};
use futures::StreamExt;
use http::{Method, Uri};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::auth::{AuthHandler, AuthenticationManager, Authenticator};
use crate::cookie::CookieJar;
use crate::error::ReplyError;
use crate::fsm::handle::ReplyShared;
use crate::fsm::{ReplyState, UploadBody};
use crate::transport::{
    AuthChallenge, ResponseHead, TransportBackend, TransportContext, TransportEvent,
    TransportFactory,
};

/// Headers that describe one hop, never the resource. They are stripped
/// before response headers enter the cache.
const HOP_BY_HOP_HEADERS: [&[u8]; 8] = [
    b"connection",
    b"keep-alive",
    b"proxy-authenticate",
    b"proxy-authorization",
    b"te",
    b"trailers",
    b"transfer-encoding",
    b"upgrade",
];

/// Entity headers a 304 must not clobber: the revalidation response has no
/// body, so the cached description of the body stays authoritative.
const KEEP_ON_REVALIDATION: [&[u8]; 4] = [
    b"content-encoding",
    b"content-range",
    b"content-type",
    b"content-length",
];

/// Manager-wide services every reply driver borrows.
pub(crate) struct EngineServices {
    pub cache: Option<Arc<dyn NetworkCache>>,
    pub factories: Vec<Arc<dyn TransportFactory>>,
    pub worker: tokio::runtime::Handle,
    pub auth: Arc<AuthenticationManager>,
    pub auth_handler: Option<Arc<dyn AuthHandler>>,
    pub cookie_jar: Option<Arc<dyn CookieJar>>,
}

enum CacheLookup {
    /// The reply was completed from the cache.
    Served,
    /// Cache-only policy and no usable entry.
    Miss,
    /// Go to the network (revalidation headers may have been added).
    Network,
}

enum Step {
    Continue,
    Done,
    Redispatch,
}

/// The task driving one reply from dispatch to its terminal state.
pub(crate) struct ReplyDriver {
    request: Request,
    upload: Option<UploadBody>,
    services: Arc<EngineServices>,
    shared: Arc<ReplyShared>,
    chunks: Option<mpsc::UnboundedSender<Bytes>>,
    window: watch::Receiver<u64>,
    abort: watch::Receiver<bool>,
    cache_writer: Option<CacheWriter>,
    pending_cache_meta: Option<CacheMetaData>,
    bytes_received: u64,
    server_supports_resume: bool,
    backend_can_resume: bool,
    tried_url_credentials: bool,
    last_auth_identity: Option<String>,
}

impl ReplyDriver {
    pub(crate) fn new(
        request: Request,
        upload: Option<UploadBody>,
        services: Arc<EngineServices>,
        shared: Arc<ReplyShared>,
        chunks: mpsc::UnboundedSender<Bytes>,
        window: watch::Receiver<u64>,
        abort: watch::Receiver<bool>,
    ) -> Self {
        Self {
            request,
            upload,
            services,
            shared,
            chunks: Some(chunks),
            window,
            abort,
            cache_writer: None,
            pending_cache_meta: None,
            bytes_received: 0,
            server_supports_resume: false,
            backend_can_resume: false,
            tried_url_credentials: false,
            last_auth_identity: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let upload = match self.upload.take() {
            None => None,
            Some(UploadBody::Full(body)) => Some(body),
            Some(UploadBody::Sequential(mut stream)) => {
                self.set_state(ReplyState::Buffering);
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk);
                }
                Some(buf.freeze())
            }
        };
        if *self.abort.borrow() {
            self.complete(Err(ReplyError::OperationCanceled), ReplyState::Aborted);
            return;
        }

        let mut transport_request = self.request.clone();
        self.apply_cookies(&mut transport_request);

        // mutating verbs invalidate whatever the cache holds for the URL,
        // even if the operation later fails
        let method = self.request.method().clone();
        if method == Method::POST || method == Method::PUT || method == Method::DELETE {
            if let Some(cache) = self.services.cache.clone() {
                if cache.remove(self.request.url()).await {
                    debug!(url = %self.request.url(), "invalidated cache entry before write");
                }
            }
        }

        if method == Method::GET || method == Method::HEAD {
            match self.load_from_cache_if_allowed(&mut transport_request).await {
                CacheLookup::Served => return,
                CacheLookup::Miss => {
                    self.complete(Err(ReplyError::ContentNotFound), ReplyState::Finished);
                    return;
                }
                CacheLookup::Network => {}
            }
        } else if self.request.cache_load_control() == CacheLoadControl::AlwaysCache {
            // only GET and HEAD can be answered from the cache
            self.complete(Err(ReplyError::ContentNotFound), ReplyState::Finished);
            return;
        }

        self.dispatch(transport_request, upload).await;
    }

    /// The cache consultation run before any GET/HEAD dispatch.
    ///
    /// Attaches revalidation headers to `transport_request` whenever a cached
    /// entry exists, so a later network round trip can come back as 304.
    async fn load_from_cache_if_allowed(
        &mut self,
        transport_request: &mut Request,
    ) -> CacheLookup {
        let control = self.request.cache_load_control();
        if control == CacheLoadControl::AlwaysNetwork {
            // end-to-end reload: tell intermediaries to skip their caches
            // too, unless the caller already speaks cache-control itself
            if !transport_request.headers().contains(b"cache-control") {
                transport_request.set_header(&b"Cache-Control"[..], &b"no-cache"[..]);
                transport_request.set_header(&b"Pragma"[..], &b"no-cache"[..]);
            }
            return CacheLookup::Network;
        }
        if transport_request.headers().contains(b"range") {
            // the cache stores whole bodies only
            return CacheLookup::Network;
        }

        let only_cache = control == CacheLoadControl::AlwaysCache;
        let miss = || {
            if only_cache {
                CacheLookup::Miss
            } else {
                CacheLookup::Network
            }
        };
        let Some(cache) = self.services.cache.clone() else {
            return miss();
        };
        let meta = cache.meta_data(self.request.url()).await;
        if !meta.is_valid() || !meta.save_to_disk() {
            return miss();
        }

        for (name, value) in freshness::revalidation_headers(&meta) {
            transport_request.set_header(name, value);
        }

        if freshness::must_revalidate(meta.raw_headers()) {
            return miss();
        }
        let fresh = match control {
            CacheLoadControl::PreferCache | CacheLoadControl::AlwaysCache => true,
            _ => freshness::response_is_fresh(&meta, Utc::now()),
        };
        if !fresh {
            return CacheLookup::Network;
        }

        if self.send_cache_contents(&cache, meta).await {
            CacheLookup::Served
        } else {
            miss()
        }
    }

    /// Completes the reply out of the cache. Returns `false` (leaving the
    /// reply untouched) when the content is gone despite valid metadata.
    async fn send_cache_contents(
        &mut self,
        cache: &Arc<dyn NetworkCache>,
        meta: CacheMetaData,
    ) -> bool {
        let Some(mut stream) = cache.data(self.request.url()).await else {
            debug!(url = %self.request.url(), "cache holds metadata but no content");
            return false;
        };
        self.set_state(ReplyState::Working);

        let status = meta
            .attributes()
            .get(&Attribute::HttpStatusCode.code())
            .and_then(AttributeValue::as_int)
            .unwrap_or(200);
        let reason = meta
            .attributes()
            .get(&Attribute::HttpReasonPhrase.code())
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let redirect = if matches!(status, 301 | 302 | 303 | 307) {
            meta.raw_headers()
                .get(b"location")
                .and_then(|loc| resolve_location(self.request.url(), loc))
        } else {
            None
        };

        self.shared.with_inner(|inner| {
            inner.status = Some(status as u16);
            inner.reason = reason.clone();
            inner.headers = meta.raw_headers().clone();
            inner
                .attributes
                .insert(Attribute::HttpStatusCode.code(), AttributeValue::Int(status));
            if !reason.is_empty() {
                inner.attributes.insert(
                    Attribute::HttpReasonPhrase.code(),
                    AttributeValue::Str(reason.clone()),
                );
            }
            inner
                .attributes
                .insert(Attribute::SourceIsFromCache.code(), AttributeValue::Bool(true));
            if let Some(target) = &redirect {
                inner.attributes.insert(
                    Attribute::RedirectionTarget.code(),
                    AttributeValue::Url(target.clone()),
                );
            }
        });

        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            total += chunk.len() as u64;
            self.deliver(chunk);
        }
        self.shared.with_inner(|inner| {
            inner.bytes_received = total;
            inner.bytes_total = Some(total);
        });
        debug!(url = %self.request.url(), bytes = total, "served reply from cache");
        self.complete(Ok(()), ReplyState::Finished);
        true
    }

    async fn dispatch(&mut self, mut request: Request, upload: Option<Bytes>) {
        loop {
            let mut backend = match self.create_backend(&request) {
                Some(backend) => backend,
                None => {
                    warn!(url = %request.url(), "no transport accepts this URL");
                    self.complete(Err(ReplyError::ProtocolFailure), ReplyState::Finished);
                    return;
                }
            };
            self.backend_can_resume = backend.can_resume();
            if self.bytes_received > 0 {
                backend.set_resume_offset(self.bytes_received);
                request.set_header(
                    &b"Range"[..],
                    Bytes::from(format!("bytes={}-", self.bytes_received)),
                );
            }

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let ctx = TransportContext {
                request: request.clone(),
                upload: upload.clone(),
                events: events_tx,
                read_window: self.window.clone(),
            };
            self.set_state(ReplyState::Working);
            self.services.worker.spawn(backend.open(ctx));

            match self.event_loop(&mut events_rx).await {
                Step::Redispatch => continue,
                _ => return,
            }
        }
    }

    fn create_backend(&self, request: &Request) -> Option<Box<dyn TransportBackend>> {
        self.services
            .factories
            .iter()
            .find_map(|factory| factory.create(request))
    }

    async fn event_loop(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Step {
        loop {
            tokio::select! {
                changed = self.abort.changed() => {
                    if changed.is_ok() && *self.abort.borrow() {
                        self.cache_writer = None;
                        self.complete(Err(ReplyError::OperationCanceled), ReplyState::Aborted);
                        return Step::Done;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        self.complete(
                            Err(ReplyError::InternalFailure(
                                "transport stopped without completion".to_string(),
                            )),
                            ReplyState::Finished,
                        );
                        return Step::Done;
                    };
                    match self.process(event).await {
                        Step::Continue => {}
                        step => return step,
                    }
                    // drain everything already queued before parking again,
                    // so a burst of small chunks is handled as one batch
                    while let Ok(event) = events.try_recv() {
                        match self.process(event).await {
                            Step::Continue => {}
                            step => return step,
                        }
                    }
                }
            }
        }
    }

    async fn process(&mut self, event: TransportEvent) -> Step {
        if self.shared.state().is_terminal() {
            if matches!(event, TransportEvent::Finished | TransportEvent::Error(_)) {
                warn!(url = %self.request.url(), "late transport completion ignored");
            }
            return Step::Done;
        }
        match event {
            TransportEvent::Metadata(head) => self.on_metadata(head).await,
            TransportEvent::Data(chunk) => {
                self.on_data(chunk).await;
                Step::Continue
            }
            TransportEvent::Progress { received, total } => {
                self.shared.with_inner(|inner| {
                    inner.bytes_received = received;
                    inner.bytes_total = total;
                });
                Step::Continue
            }
            TransportEvent::AuthRequired {
                challenge,
                responder,
            } => {
                let answer = self.answer_challenge(challenge);
                let _ = responder.send(answer);
                Step::Continue
            }
            TransportEvent::SessionUnavailable => {
                self.set_state(ReplyState::WaitingForSession);
                Step::Continue
            }
            TransportEvent::SessionReady => {
                if self.shared.state() == ReplyState::WaitingForSession {
                    Step::Redispatch
                } else {
                    Step::Continue
                }
            }
            TransportEvent::PathChanged => self.on_path_changed(),
            TransportEvent::Error(err) => {
                self.on_error(err).await;
                Step::Done
            }
            TransportEvent::Finished => {
                self.on_finished().await;
                Step::Done
            }
        }
    }

    async fn on_metadata(&mut self, head: ResponseHead) -> Step {
        self.store_cookies(&head);
        self.server_supports_resume = head.supports_resume;

        if head.status == 304 {
            return self.on_not_modified(&head).await;
        }
        if (500..=599).contains(&head.status) && self.serve_stale_on_server_error().await {
            return Step::Done;
        }

        let redirect = if matches!(head.status, 301 | 302 | 303 | 307) {
            head.headers
                .get(b"location")
                .and_then(|loc| resolve_location(self.request.url(), loc))
        } else {
            None
        };

        self.shared.with_inner(|inner| {
            inner.status = Some(head.status);
            inner.reason = head.reason.clone();
            inner.headers = head.headers.clone();
            inner.attributes.insert(
                Attribute::HttpStatusCode.code(),
                AttributeValue::Int(head.status as i64),
            );
            if !head.reason.is_empty() {
                inner.attributes.insert(
                    Attribute::HttpReasonPhrase.code(),
                    AttributeValue::Str(head.reason.clone()),
                );
            }
            inner
                .attributes
                .insert(Attribute::SourceIsFromCache.code(), AttributeValue::Bool(false));
            if let Some(target) = &redirect {
                inner.attributes.insert(
                    Attribute::RedirectionTarget.code(),
                    AttributeValue::Url(target.clone()),
                );
            }
        });

        self.stage_cache_meta(&head).await;
        Step::Continue
    }

    /// A 304 refreshes the stored metadata and then completes the reply with
    /// the cached body. The stored status line and entity headers survive.
    async fn on_not_modified(&mut self, head: &ResponseHead) -> Step {
        let Some(cache) = self.services.cache.clone() else {
            self.shared.with_inner(|inner| {
                inner.status = Some(head.status);
                inner.reason = head.reason.clone();
                inner.headers = head.headers.clone();
                inner.attributes.insert(
                    Attribute::HttpStatusCode.code(),
                    AttributeValue::Int(head.status as i64),
                );
            });
            return Step::Continue;
        };
        let old = cache.meta_data(self.request.url()).await;
        if !old.is_valid() {
            debug!(url = %self.request.url(), "304 for an entry no longer cached");
            self.complete(Err(ReplyError::ContentNotFound), ReplyState::Finished);
            return Step::Done;
        }
        let merged = build_cache_meta_data(
            self.request.url(),
            self.request.method(),
            head,
            old,
            Utc::now(),
        );
        cache.update_meta_data(&merged).await;
        if !self.send_cache_contents(&cache, merged).await {
            self.complete(Err(ReplyError::ContentNotFound), ReplyState::Finished);
        }
        Step::Done
    }

    /// After a 5xx, a stored copy is better than the error page as long as
    /// the origin never demanded revalidation.
    async fn serve_stale_on_server_error(&mut self) -> bool {
        let method = self.request.method();
        if *method != Method::GET && *method != Method::HEAD {
            return false;
        }
        if self.request.cache_load_control() == CacheLoadControl::AlwaysNetwork {
            return false;
        }
        let Some(cache) = self.services.cache.clone() else {
            return false;
        };
        let meta = cache.meta_data(self.request.url()).await;
        if !meta.is_valid() || !meta.save_to_disk() {
            return false;
        }
        if freshness::must_revalidate(meta.raw_headers()) {
            return false;
        }
        debug!(url = %self.request.url(), "server error, serving stale cached copy");
        self.send_cache_contents(&cache, meta).await
    }

    /// Builds the metadata a cacheable response would be stored under and
    /// holds it until body data actually arrives. `prepare` runs on the
    /// first chunk, so a body-less completion (every HEAD) commits nothing
    /// and cannot clobber a previously cached body.
    async fn stage_cache_meta(&mut self, head: &ResponseHead) {
        if self.bytes_received > 0 {
            // resumed transfer, the writer from the first attempt continues
            return;
        }
        self.cache_writer = None;
        self.pending_cache_meta = None;
        if !self.request.cache_save_enabled() {
            return;
        }
        if head.status == 206 {
            // partial bodies never enter the cache
            return;
        }
        let Some(cache) = self.services.cache.clone() else {
            return;
        };
        let old = cache.meta_data(self.request.url()).await;
        let meta = build_cache_meta_data(
            self.request.url(),
            self.request.method(),
            head,
            old,
            Utc::now(),
        );
        if !meta.save_to_disk() {
            return;
        }
        self.pending_cache_meta = Some(meta);
    }

    async fn on_data(&mut self, chunk: Bytes) {
        self.bytes_received += chunk.len() as u64;
        let received = self.bytes_received;
        self.shared.with_inner(|inner| inner.bytes_received = received);
        if self.cache_writer.is_none() {
            if let Some(meta) = self.pending_cache_meta.take() {
                if let Some(cache) = self.services.cache.clone() {
                    self.cache_writer = cache.prepare(meta).await;
                }
            }
        }
        if let Some(writer) = &mut self.cache_writer {
            writer.write(&chunk);
        }
        self.deliver(chunk);
    }

    fn on_path_changed(&mut self) -> Step {
        let resumable = *self.request.method() == Method::GET
            && self.backend_can_resume
            && self.server_supports_resume;
        if resumable {
            debug!(
                url = %self.request.url(),
                offset = self.bytes_received,
                "network path changed, resuming transfer"
            );
            self.set_state(ReplyState::Reconnecting);
            Step::Redispatch
        } else {
            self.cache_writer = None;
            self.complete(Err(ReplyError::TemporaryNetworkFailure), ReplyState::Finished);
            Step::Done
        }
    }

    /// A failed download never leaves a half-written entry live: the open
    /// writer is discarded and the stored entry for the URL is evicted.
    async fn on_error(&mut self, err: ReplyError) {
        if self.cache_writer.take().is_some() {
            if let Some(cache) = self.services.cache.clone() {
                cache.remove(self.request.url()).await;
            }
        }
        self.complete(Err(err), ReplyState::Finished);
    }

    async fn on_finished(&mut self) {
        if let Some(writer) = self.cache_writer.take() {
            if let Some(cache) = self.services.cache.clone() {
                debug!(
                    url = %self.request.url(),
                    bytes = writer.written(),
                    "committing response to cache"
                );
                cache.insert(writer).await;
            }
        }
        self.complete(Ok(()), ReplyState::Finished);
    }

    /// Credential lookup order: URL userinfo (once), then the credential
    /// cache, then the application handler. A repeated challenge for the
    /// same identity skips the cache, its answer was just rejected.
    fn answer_challenge(&mut self, challenge: AuthChallenge) -> Option<Authenticator> {
        let identity = match &challenge.proxy {
            Some(proxy) => format!(
                "proxy:{}:{}#{}",
                proxy.host, proxy.port, challenge.authenticator.realm
            ),
            None => format!("{}#{}", self.request.url(), challenge.authenticator.realm),
        };

        if challenge.proxy.is_none() && !self.tried_url_credentials {
            if let Some(password) = crate::auth::url_password(self.request.url()) {
                self.tried_url_credentials = true;
                self.last_auth_identity = Some(identity);
                return Some(Authenticator {
                    realm: challenge.authenticator.realm.clone(),
                    user: crate::auth::url_user(self.request.url()).unwrap_or_default(),
                    password: Some(password),
                });
            }
        }

        let repeated = self.last_auth_identity.as_deref() == Some(identity.as_str());
        if !repeated {
            let cached = match &challenge.proxy {
                Some(proxy) => self
                    .services
                    .auth
                    .fetch_cached_proxy_credentials(proxy, Some(&challenge.authenticator)),
                None => self
                    .services
                    .auth
                    .fetch_cached_credentials(self.request.url(), Some(&challenge.authenticator)),
            };
            if !cached.is_null() {
                self.last_auth_identity = Some(identity);
                return Some(Authenticator {
                    realm: challenge.authenticator.realm.clone(),
                    user: cached.user,
                    password: Some(cached.password),
                });
            }
        }

        if let Some(handler) = self.services.auth_handler.clone() {
            let mut answer = challenge.authenticator.clone();
            if handler.handle(&challenge, &mut answer) && answer.password.is_some() {
                match &challenge.proxy {
                    Some(proxy) => self.services.auth.cache_proxy_credentials(proxy, &answer),
                    None => self.services.auth.cache_credentials(self.request.url(), &answer),
                }
                self.last_auth_identity = Some(identity);
                return Some(answer);
            }
        }
        None
    }

    fn apply_cookies(&self, request: &mut Request) {
        let Some(jar) = &self.services.cookie_jar else {
            return;
        };
        if request.headers().contains(b"cookie") {
            // a caller-supplied header wins over the jar
            return;
        }
        let cookies = jar.cookies_for_url(request.url());
        if !cookies.is_empty() {
            request.set_header(&b"Cookie"[..], Bytes::from(cookies.join("; ")));
        }
    }

    fn store_cookies(&self, head: &ResponseHead) {
        let Some(jar) = &self.services.cookie_jar else {
            return;
        };
        let values: Vec<String> = head
            .headers
            .get_all(b"set-cookie")
            .filter_map(|v| std::str::from_utf8(v).ok().map(str::to_string))
            .collect();
        if !values.is_empty() {
            jar.set_cookies_from_url(&values, self.request.url());
        }
    }

    fn deliver(&mut self, chunk: Bytes) {
        let len = chunk.len() as u64;
        if let Some(tx) = &self.chunks {
            if tx.send(chunk).is_ok() {
                self.shared.buffered(len);
            }
        }
    }

    fn set_state(&self, state: ReplyState) {
        self.shared.with_inner(|inner| {
            if !inner.state.is_terminal() {
                inner.state = state;
            }
        });
    }

    /// Moves the reply into its terminal state exactly once and closes the
    /// consumer channel. A second call is logged and discarded.
    fn complete(&mut self, result: Result<(), ReplyError>, terminal: ReplyState) {
        let was_terminal = self.shared.with_inner(|inner| {
            if inner.state.is_terminal() {
                return true;
            }
            inner.state = terminal;
            if let Err(err) = result {
                inner.error = Some(err);
            }
            false
        });
        if was_terminal {
            warn!(url = %self.request.url(), "duplicate completion ignored");
            return;
        }
        self.chunks = None;
    }
}

/// Builds the cache metadata for a response, merging over any previously
/// stored entry.
///
/// Hop-by-hop headers and 1xx `Warning` values are dropped, a 304 keeps the
/// cached entity headers and status line, and `save_to_disk` encodes the
/// per-verb caching policy.
fn build_cache_meta_data(
    url: &Uri,
    method: &Method,
    head: &ResponseHead,
    old: CacheMetaData,
    now: DateTime<Utc>,
) -> CacheMetaData {
    let revalidation = head.status == 304;
    let mut meta = if old.is_valid() {
        old
    } else {
        CacheMetaData::new(url)
    };

    for (name, value) in head.headers.iter() {
        let lower: Vec<u8> = name.iter().map(|b| b.to_ascii_lowercase()).collect();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_slice()) {
            continue;
        }
        if lower == b"warning" && value.first() == Some(&b'1') {
            // 1xx warnings describe the connection that produced them
            continue;
        }
        if revalidation
            && KEEP_ON_REVALIDATION.contains(&lower.as_slice())
            && meta.raw_headers().contains(&lower)
        {
            continue;
        }
        meta.raw_headers_mut().set(name.clone(), value.clone());
    }

    if let Some(expiration) = freshness::expiration_from_headers(meta.raw_headers(), now) {
        meta.set_expiration_date(Some(expiration));
    }
    if let Some(last_modified) = freshness::last_modified_from_headers(meta.raw_headers()) {
        meta.set_last_modified(Some(last_modified));
    }

    let directives = meta
        .raw_headers()
        .get(b"cache-control")
        .map(|v| parse_option_header(v))
        .unwrap_or_default();
    let no_store =
        directives.contains_key("no-store") || directives.contains_key("no-cache");
    let pragma_no_cache = head
        .headers
        .get(b"pragma")
        .is_some_and(|v| v.as_ref() == b"no-cache");
    let save = if *method == Method::GET || *method == Method::HEAD {
        !(no_store || pragma_no_cache)
    } else if *method == Method::POST {
        directives.contains_key("max-age") && !no_store
    } else {
        false
    };
    meta.set_save_to_disk(save);

    if !revalidation {
        let mut attributes = fetchbox_core::AttributeMap::new();
        attributes.insert(
            Attribute::HttpStatusCode.code(),
            AttributeValue::Int(head.status as i64),
        );
        if !head.reason.is_empty() {
            attributes.insert(
                Attribute::HttpReasonPhrase.code(),
                AttributeValue::Str(head.reason.clone()),
            );
        }
        meta.set_attributes(attributes);
    }
    meta
}

/// Resolves a `Location` header against the request URL.
fn resolve_location(base: &Uri, location: &[u8]) -> Option<Uri> {
    let text = std::str::from_utf8(location).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(uri) = text.parse::<Uri>() {
        if uri.scheme().is_some() {
            return Some(uri);
        }
    }
    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base.authority()?.as_str();
    let target = if text.starts_with('/') {
        format!("{scheme}://{authority}{text}")
    } else {
        let path = base.path();
        let dir = match path.rfind('/') {
            Some(i) => &path[..=i],
            None => "/",
        };
        format!("{scheme}://{authority}{dir}{text}")
    };
    target.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchbox_core::HeaderList;

    fn head(status: u16, pairs: &[(&'static [u8], &'static [u8])]) -> ResponseHead {
        let mut headers = HeaderList::new();
        for (name, value) in pairs {
            headers.append(*name, *value);
        }
        ResponseHead {
            status,
            reason: "test".to_string(),
            headers,
            supports_resume: false,
        }
    }

    fn url() -> Uri {
        "http://example.com/dir/page".parse().unwrap()
    }

    #[test]
    fn hop_by_hop_headers_never_enter_the_cache() {
        let head = head(
            200,
            &[
                (b"Connection", b"keep-alive"),
                (b"Transfer-Encoding", b"chunked"),
                (b"Content-Type", b"text/html"),
            ],
        );
        let meta = build_cache_meta_data(
            &url(),
            &Method::GET,
            &head,
            CacheMetaData::default(),
            Utc::now(),
        );
        assert!(!meta.raw_headers().contains(b"connection"));
        assert!(!meta.raw_headers().contains(b"transfer-encoding"));
        assert_eq!(
            meta.raw_headers().get(b"content-type").unwrap().as_ref(),
            b"text/html"
        );
    }

    #[test]
    fn transient_warnings_are_dropped_but_persistent_ones_kept() {
        let stale = head(
            200,
            &[
                (b"Warning", b"110 - \"response is stale\""),
                (b"Content-Type", b"text/plain"),
            ],
        );
        let meta = build_cache_meta_data(
            &url(),
            &Method::GET,
            &stale,
            CacheMetaData::default(),
            Utc::now(),
        );
        assert!(!meta.raw_headers().contains(b"warning"));

        let transformed = head(200, &[(b"Warning", b"214 - \"transformed\"")]);
        let meta = build_cache_meta_data(
            &url(),
            &Method::GET,
            &transformed,
            CacheMetaData::default(),
            Utc::now(),
        );
        assert!(meta.raw_headers().contains(b"warning"));
    }

    #[test]
    fn revalidation_keeps_entity_headers_and_status() {
        let now = Utc::now();
        let original = head(
            200,
            &[
                (b"Content-Type", b"image/png"),
                (b"Content-Length", b"1234"),
                (b"Cache-Control", b"max-age=10"),
            ],
        );
        let stored =
            build_cache_meta_data(&url(), &Method::GET, &original, CacheMetaData::default(), now);
        assert_eq!(
            stored
                .attributes()
                .get(&Attribute::HttpStatusCode.code())
                .and_then(AttributeValue::as_int),
            Some(200)
        );

        let not_modified = head(
            304,
            &[
                (b"Content-Type", b"text/should-not-win"),
                (b"Cache-Control", b"max-age=60"),
            ],
        );
        let merged = build_cache_meta_data(&url(), &Method::GET, &not_modified, stored, now);
        assert_eq!(
            merged.raw_headers().get(b"content-type").unwrap().as_ref(),
            b"image/png"
        );
        assert_eq!(
            merged.raw_headers().get(b"content-length").unwrap().as_ref(),
            b"1234"
        );
        // status attributes stay those of the original 200
        assert_eq!(
            merged
                .attributes()
                .get(&Attribute::HttpStatusCode.code())
                .and_then(AttributeValue::as_int),
            Some(200)
        );
        // but freshness is extended by the new cache-control
        assert_eq!(
            merged.expiration_date(),
            Some(now + chrono::Duration::seconds(60))
        );
    }

    #[test]
    fn save_policy_per_verb() {
        let now = Utc::now();
        let plain = head(200, &[(b"Content-Type", b"text/plain")]);
        let meta =
            build_cache_meta_data(&url(), &Method::GET, &plain, CacheMetaData::default(), now);
        assert!(meta.save_to_disk());

        let no_store = head(200, &[(b"Cache-Control", b"no-store")]);
        let meta =
            build_cache_meta_data(&url(), &Method::GET, &no_store, CacheMetaData::default(), now);
        assert!(!meta.save_to_disk());

        let pragma = head(200, &[(b"Pragma", b"no-cache")]);
        let meta =
            build_cache_meta_data(&url(), &Method::GET, &pragma, CacheMetaData::default(), now);
        assert!(!meta.save_to_disk());

        let plain = head(200, &[(b"Content-Type", b"text/plain")]);
        let meta =
            build_cache_meta_data(&url(), &Method::POST, &plain, CacheMetaData::default(), now);
        assert!(!meta.save_to_disk());

        let max_age = head(200, &[(b"Cache-Control", b"max-age=30")]);
        let meta =
            build_cache_meta_data(&url(), &Method::POST, &max_age, CacheMetaData::default(), now);
        assert!(meta.save_to_disk());

        let max_age = head(200, &[(b"Cache-Control", b"max-age=30")]);
        let meta =
            build_cache_meta_data(&url(), &Method::PUT, &max_age, CacheMetaData::default(), now);
        assert!(!meta.save_to_disk());
    }

    #[test]
    fn max_age_beats_expires() {
        let now = Utc::now();
        let both = head(
            200,
            &[
                (b"Cache-Control", b"max-age=300"),
                (b"Expires", b"Thu, 01 Jan 1970 00:00:00 GMT"),
            ],
        );
        let meta =
            build_cache_meta_data(&url(), &Method::GET, &both, CacheMetaData::default(), now);
        assert_eq!(
            meta.expiration_date(),
            Some(now + chrono::Duration::seconds(300))
        );
    }

    #[test]
    fn location_resolution() {
        let base: Uri = "http://example.com/a/b/page.html".parse().unwrap();
        assert_eq!(
            resolve_location(&base, b"http://other.example/x").unwrap(),
            "http://other.example/x".parse::<Uri>().unwrap()
        );
        assert_eq!(
            resolve_location(&base, b"/rooted").unwrap(),
            "http://example.com/rooted".parse::<Uri>().unwrap()
        );
        assert_eq!(
            resolve_location(&base, b"sibling").unwrap(),
            "http://example.com/a/b/sibling".parse::<Uri>().unwrap()
        );
        assert!(resolve_location(&base, b"").is_none());
    }
}
