//! Reply attributes.
//!
//! Attributes are the small integer-coded side channel carried by replies
//! and by cache metadata: status code, reason phrase, redirect target,
//! cache-source marker and the cache load/save controls. Codes are stable
//! because they participate in the metadata wire format.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::Uri;

/// Well-known attribute codes.
///
/// The numeric values are part of the cache metadata wire format and must
/// not be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Attribute {
    /// HTTP status code of the response.
    HttpStatusCode = 0,
    /// HTTP reason phrase of the response.
    HttpReasonPhrase = 1,
    /// Resolved `Location` target of a redirect-class response.
    RedirectionTarget = 2,
    /// `true` when the reply body was served from the cache.
    SourceIsFromCache = 3,
    /// Cache read policy requested for the operation.
    CacheLoadControl = 4,
    /// Whether the response may be written to the cache.
    CacheSaveControl = 5,
    /// `true` when the underlying connection was encrypted.
    ConnectionEncrypted = 6,
}

impl Attribute {
    /// Returns the wire code for this attribute.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Looks an attribute up by wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::HttpStatusCode),
            1 => Some(Self::HttpReasonPhrase),
            2 => Some(Self::RedirectionTarget),
            3 => Some(Self::SourceIsFromCache),
            4 => Some(Self::CacheLoadControl),
            5 => Some(Self::CacheSaveControl),
            6 => Some(Self::ConnectionEncrypted),
            _ => None,
        }
    }
}

/// Cache read policy for a single operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheLoadControl {
    /// Always hit the network, never the cache.
    AlwaysNetwork,
    /// Use the cache when fresh, the network otherwise (default).
    #[default]
    PreferNetwork,
    /// Use the cache even when stale, the network only on a miss.
    PreferCache,
    /// Only the cache; a miss is an error.
    AlwaysCache,
}

impl CacheLoadControl {
    /// Wire code for the attribute map.
    pub fn code(self) -> i64 {
        match self {
            Self::AlwaysNetwork => 0,
            Self::PreferNetwork => 1,
            Self::PreferCache => 2,
            Self::AlwaysCache => 3,
        }
    }

    /// Decodes a wire code, defaulting to `PreferNetwork` for unknown values.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::AlwaysNetwork,
            2 => Self::PreferCache,
            3 => Self::AlwaysCache,
            _ => Self::PreferNetwork,
        }
    }
}

/// Variant value stored in an attribute map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Signed integer (status codes, policy codes).
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// UTF-8 string (reason phrases).
    Str(String),
    /// Opaque bytes.
    Bytes(Bytes),
    /// URL value (redirect targets).
    Url(Uri),
}

impl AttributeValue {
    /// Integer view of this value, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view of this value, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of this value, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// URL view of this value, if it is one.
    pub fn as_url(&self) -> Option<&Uri> {
        match self {
            Self::Url(v) => Some(v),
            _ => None,
        }
    }
}

/// Attribute map keyed by wire code.
///
/// A `BTreeMap` keeps serialization order deterministic.
pub type AttributeMap = BTreeMap<u16, AttributeValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_codes_round_trip() {
        for attr in [
            Attribute::HttpStatusCode,
            Attribute::HttpReasonPhrase,
            Attribute::RedirectionTarget,
            Attribute::SourceIsFromCache,
            Attribute::CacheLoadControl,
            Attribute::CacheSaveControl,
            Attribute::ConnectionEncrypted,
        ] {
            assert_eq!(Attribute::from_code(attr.code()), Some(attr));
        }
        assert_eq!(Attribute::from_code(999), None);
    }

    #[test]
    fn unknown_load_control_defaults_to_prefer_network() {
        assert_eq!(CacheLoadControl::from_code(42), CacheLoadControl::PreferNetwork);
    }
}
