#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Shared-object registry with reference counting and delayed expiry.
///
/// Transports park expensive objects (connections, sessions, credential
/// stores) here so concurrent replies can share them. Non-shareable objects
/// are handed to one waiter at a time through a FIFO queue.
pub mod access_cache;

/// Credential caching and challenge answering.
///
/// [`AuthenticationManager`](auth::AuthenticationManager) stores
/// `(realm, domain) -> (user, password)` tuples for origins and proxies;
/// [`AuthHandler`](auth::AuthHandler) lets the application answer challenges
/// nothing cached can.
pub mod auth;

/// Engine tuning parameters.
pub mod config;

/// Cookie jar integration point.
pub mod cookie;

/// Error types for reply operations.
pub mod error;

/// The reply state machine: per-reply driver task, lifecycle states and the
/// consumer-facing handle.
pub mod fsm;

/// The reply manager and its builder.
pub mod manager;

/// Transport backends and their event protocol.
pub mod transport;

pub use access_cache::{AccessCache, CacheableObject, SharedObject};
pub use auth::{AuthHandler, AuthenticationManager, Authenticator, Credential, Proxy, ProxyKind};
pub use config::{AccessCacheConfig, ManagerConfig};
pub use cookie::CookieJar;
pub use error::ReplyError;
pub use fsm::{ReplyHandle, ReplyState, UploadBody};
pub use manager::{ReplyManager, ReplyManagerBuilder};
pub use transport::{
    AuthChallenge, DataTransportFactory, FileTransportFactory, ResponseHead, TransportBackend,
    TransportContext, TransportEvent, TransportFactory,
};

pub use fetchbox_cache::{CacheWriter, ContentStream, MemoryCache, NetworkCache};
pub use fetchbox_core::{
    Attribute, AttributeMap, AttributeValue, CacheLoadControl, CacheMetaData, HeaderList, Request,
};
