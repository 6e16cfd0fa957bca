#![warn(missing_docs)]
//! # fetchbox-core
//!
//! Core value types for the fetchbox request-lifecycle engine.
//!
//! This crate provides the vocabulary shared by the cache protocol and the
//! reply engine:
//!
//! - **Raw headers** ([`HeaderList`]) — ordered, duplicate-preserving header
//!   pairs with `Cache-Control`-style directive parsing
//! - **Reply attributes** ([`Attribute`], [`AttributeValue`]) — the small
//!   integer-coded side channel carried by replies and cache metadata
//! - **Cache metadata** ([`CacheMetaData`]) — the value object exchanged with
//!   cache backends, including its fixed-order binary wire format
//! - **Freshness** ([`freshness`]) — the RFC 2616 §13.2 freshness and
//!   revalidation rules
//! - **Requests** ([`Request`]) — the abstract request description consumed
//!   by the engine

pub mod attribute;
pub mod freshness;
pub mod headers;
pub mod httpdate;
pub mod meta;
pub mod request;

pub use attribute::{Attribute, AttributeMap, AttributeValue, CacheLoadControl};
pub use headers::HeaderList;
pub use httpdate::{format_http_date, parse_http_date};
pub use meta::CacheMetaData;
pub use request::Request;
