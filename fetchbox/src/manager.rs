//! The reply manager.
//!
//! One [`ReplyManager`] owns everything its replies share: the transport
//! worker thread, the response cache, the credential cache, the shared-object
//! registry and the cookie jar. Operations hand back a [`ReplyHandle`]
//! immediately; the actual work runs as one driver task per reply.

use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;
use fetchbox_cache::NetworkCache;
use fetchbox_core::Request;
use http::{Method, Uri};
use tokio::sync::oneshot;
use tracing::debug;

use crate::access_cache::AccessCache;
use crate::auth::{AuthHandler, AuthenticationManager};
use crate::config::ManagerConfig;
use crate::cookie::CookieJar;
use crate::error::ReplyError;
use crate::fsm::{new_reply_channel, EngineServices, ReplyDriver, ReplyHandle, UploadBody};
use crate::transport::{DataTransportFactory, FileTransportFactory, TransportFactory};

/// The dedicated thread hosting transport I/O.
///
/// All backends run on one current-thread runtime owned by this thread;
/// reply drivers talk to it only through channels. Shutdown is a oneshot
/// signal; the runtime then gets a bounded grace period to wind down.
struct TransportWorker {
    handle: tokio::runtime::Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TransportWorker {
    fn spawn(grace: std::time::Duration) -> Result<Self, ReplyError> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = thread::Builder::new()
            .name("fetchbox-transport".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                runtime.shutdown_timeout(grace);
            })
            .map_err(|err| ReplyError::InternalFailure(err.to_string()))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| ReplyError::InternalFailure("transport worker died".to_string()))?
            .map_err(|err| ReplyError::InternalFailure(err.to_string()))?;
        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn stop(&mut self, wait: bool) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if wait {
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for TransportWorker {
    fn drop(&mut self) {
        // never join here, drop may happen on an async thread
        self.stop(false);
    }
}

/// Builder for [`ReplyManager`].
pub struct ReplyManagerBuilder {
    config: ManagerConfig,
    cache: Option<Arc<dyn NetworkCache>>,
    cookie_jar: Option<Arc<dyn CookieJar>>,
    auth_handler: Option<Arc<dyn AuthHandler>>,
    factories: Vec<Arc<dyn TransportFactory>>,
}

impl ReplyManagerBuilder {
    /// Overrides the configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a response cache.
    pub fn cache(mut self, cache: Arc<dyn NetworkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attaches a cookie jar.
    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Attaches an application credential source.
    pub fn auth_handler(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.auth_handler = Some(handler);
        self
    }

    /// Registers a transport factory. Factories are consulted in
    /// registration order; the first one accepting a request wins.
    pub fn factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Registers the built-in `file://` and `data:` backends.
    pub fn with_default_backends(self) -> Self {
        self.factory(Arc::new(FileTransportFactory))
            .factory(Arc::new(DataTransportFactory))
    }

    /// Spawns the transport worker and assembles the manager.
    pub fn build(self) -> Result<ReplyManager, ReplyError> {
        let worker = TransportWorker::spawn(self.config.shutdown_timeout)?;
        let object_cache = Arc::new(Mutex::new(AccessCache::with_config(
            self.config.access_cache.clone(),
        )));

        // idle shared objects are reaped on the worker runtime; the task
        // dies with the runtime
        let reaper_cache = Arc::clone(&object_cache);
        let granularity = self.config.access_cache.timer_granularity;
        worker.handle.spawn(async move {
            loop {
                let interval = lock_cache(&reaper_cache)
                    .next_timer_interval(tokio::time::Instant::now())
                    .unwrap_or(granularity);
                tokio::time::sleep(interval).await;
                let expired = lock_cache(&reaper_cache).expire_idle(tokio::time::Instant::now());
                if expired > 0 {
                    debug!(expired, "disposed expired idle shared objects");
                }
            }
        });

        let services = Arc::new(EngineServices {
            cache: self.cache,
            factories: self.factories,
            worker: worker.handle.clone(),
            auth: Arc::new(AuthenticationManager::new()),
            auth_handler: self.auth_handler,
            cookie_jar: self.cookie_jar,
        });
        Ok(ReplyManager {
            services,
            object_cache,
            worker,
        })
    }
}

/// Issues network operations and owns the shared state behind them.
///
/// Cheap verb methods return a [`ReplyHandle`] right away; progress, headers
/// and the body stream arrive through the handle as the driver task works.
/// Dropping the manager signals the transport worker to stop; call
/// [`shutdown`](ReplyManager::shutdown) to also wait for it.
pub struct ReplyManager {
    services: Arc<EngineServices>,
    object_cache: Arc<Mutex<AccessCache>>,
    worker: TransportWorker,
}

impl ReplyManager {
    /// Starts building a manager.
    pub fn builder() -> ReplyManagerBuilder {
        ReplyManagerBuilder {
            config: ManagerConfig::default(),
            cache: None,
            cookie_jar: None,
            auth_handler: None,
            factories: Vec::new(),
        }
    }

    /// Issues a GET.
    pub fn get(&self, url: Uri) -> ReplyHandle {
        self.execute(Request::get(url), None)
    }

    /// Issues a HEAD.
    pub fn head(&self, url: Uri) -> ReplyHandle {
        self.execute(Request::new(Method::HEAD, url), None)
    }

    /// Issues a POST carrying `body`.
    pub fn post(&self, url: Uri, body: UploadBody) -> ReplyHandle {
        self.execute(Request::new(Method::POST, url), Some(body))
    }

    /// Issues a PUT carrying `body`.
    pub fn put(&self, url: Uri, body: UploadBody) -> ReplyHandle {
        self.execute(Request::new(Method::PUT, url), Some(body))
    }

    /// Issues a DELETE.
    pub fn delete_resource(&self, url: Uri) -> ReplyHandle {
        self.execute(Request::new(Method::DELETE, url), None)
    }

    /// Issues an arbitrary verb, with an optional body.
    pub fn send_custom(
        &self,
        method: Method,
        url: Uri,
        body: Option<UploadBody>,
    ) -> ReplyHandle {
        self.execute(Request::new(method, url), body)
    }

    /// Issues a fully described operation.
    ///
    /// The driver task is spawned on the caller's runtime; this method must
    /// run inside a tokio context. Transport I/O still happens on the
    /// manager's worker thread.
    pub fn execute(&self, request: Request, upload: Option<UploadBody>) -> ReplyHandle {
        let (handle, shared, chunks, window, abort) =
            new_reply_channel(request.read_buffer_max_size());
        let driver = ReplyDriver::new(
            request,
            upload,
            Arc::clone(&self.services),
            shared,
            chunks,
            window,
            abort,
        );
        tokio::spawn(driver.run());
        handle
    }

    /// Synchronous convenience wrapper: runs one operation to completion on
    /// a throwaway current-thread runtime and returns the whole body.
    pub fn execute_blocking(
        &self,
        request: Request,
        upload: Option<UploadBody>,
    ) -> Result<Bytes, ReplyError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| ReplyError::InternalFailure(err.to_string()))?;
        runtime.block_on(async { self.execute(request, upload).wait().await })
    }

    /// Empties the response cache, the credential cache and the
    /// shared-object registry.
    pub async fn clear_caches(&self) {
        lock_cache(&self.object_cache).clear();
        self.services.auth.clear_cache();
        if let Some(cache) = &self.services.cache {
            cache.clear().await;
        }
    }

    /// The registry transports use to share expensive objects (connections,
    /// sessions) across replies.
    pub fn object_cache(&self) -> Arc<Mutex<AccessCache>> {
        Arc::clone(&self.object_cache)
    }

    /// The credential cache consulted on authentication challenges.
    pub fn authentication_manager(&self) -> Arc<AuthenticationManager> {
        Arc::clone(&self.services.auth)
    }

    /// The attached response cache, if any.
    pub fn cache(&self) -> Option<Arc<dyn NetworkCache>> {
        self.services.cache.clone()
    }

    /// Stops the transport worker and waits for it, bounded by the
    /// configured grace period. Must not be called from async context.
    pub fn shutdown(mut self) {
        self.worker.stop(true);
    }
}

fn lock_cache(cache: &Mutex<AccessCache>) -> std::sync::MutexGuard<'_, AccessCache> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_spawns_and_stops() {
        let mut worker = TransportWorker::spawn(std::time::Duration::from_secs(1)).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        worker.handle.spawn(async move {
            let _ = tx.send(42u32);
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 42);
        worker.stop(true);
    }

    #[tokio::test]
    async fn builder_assembles_a_manager() {
        let manager = ReplyManager::builder()
            .with_default_backends()
            .build()
            .unwrap();
        assert!(manager.cache().is_none());
        assert!(manager.object_cache().lock().unwrap().is_empty());
    }
}
