//! Abstract request description.

use bytes::Bytes;
use http::{Method, Uri};

use crate::attribute::CacheLoadControl;
use crate::headers::HeaderList;

/// Description of one operation handed to the reply engine.
///
/// Carries everything the engine needs to decide cache behavior and dispatch
/// a transport: URL, verb, caller-supplied headers and the cache controls.
/// Upload bodies travel separately, owned by the engine.
#[derive(Debug, Clone)]
pub struct Request {
    url: Uri,
    method: Method,
    headers: HeaderList,
    cache_load_control: CacheLoadControl,
    cache_save_enabled: bool,
    read_buffer_max_size: u64,
}

impl Request {
    /// Creates a request for `url` with the given verb and defaults:
    /// `PreferNetwork` cache policy, cache writes enabled, unlimited read
    /// buffer.
    pub fn new(method: Method, url: Uri) -> Self {
        Self {
            url,
            method,
            headers: HeaderList::new(),
            cache_load_control: CacheLoadControl::default(),
            cache_save_enabled: true,
            read_buffer_max_size: 0,
        }
    }

    /// Convenience constructor for a GET request.
    pub fn get(url: Uri) -> Self {
        Self::new(Method::GET, url)
    }

    /// The request URL.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// The request verb.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Caller-supplied headers.
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// Mutable access to the caller-supplied headers.
    pub fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    /// Sets a header, replacing any existing occurrence.
    pub fn set_header(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// The cache read policy for this operation.
    pub fn cache_load_control(&self) -> CacheLoadControl {
        self.cache_load_control
    }

    /// Sets the cache read policy.
    pub fn set_cache_load_control(&mut self, control: CacheLoadControl) -> &mut Self {
        self.cache_load_control = control;
        self
    }

    /// Whether the response may be written to the cache.
    pub fn cache_save_enabled(&self) -> bool {
        self.cache_save_enabled
    }

    /// Enables or disables cache writes for this operation.
    pub fn set_cache_save_enabled(&mut self, enabled: bool) -> &mut Self {
        self.cache_save_enabled = enabled;
        self
    }

    /// Consumer read-buffer cap in bytes; `0` means unlimited.
    pub fn read_buffer_max_size(&self) -> u64 {
        self.read_buffer_max_size
    }

    /// Sets the consumer read-buffer cap (`0` = unlimited).
    pub fn set_read_buffer_max_size(&mut self, size: u64) -> &mut Self {
        self.read_buffer_max_size = size;
        self
    }
}
