// src/core/errors.rs

//! Defines the primary error type for the cache engine.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// A key that was not produced by the key codec. Indicates a writer/reader
    /// version mismatch and is never swallowed.
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// The compute provider failed while listing or fetching resources.
    #[error("Provider fetch failed: {0}")]
    ProviderFetch(String),

    /// A stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown namespace '{0}'")]
    UnknownNamespace(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for CacheError {
    fn clone(&self) -> Self {
        match self {
            CacheError::Io(e) => CacheError::Io(Arc::clone(e)),
            CacheError::MalformedKey(s) => CacheError::MalformedKey(s.clone()),
            CacheError::ProviderFetch(s) => CacheError::ProviderFetch(s.clone()),
            CacheError::Serialization(s) => CacheError::Serialization(s.clone()),
            CacheError::InvalidRequest(s) => CacheError::InvalidRequest(s.clone()),
            CacheError::UnknownNamespace(s) => CacheError::UnknownNamespace(s.clone()),
            CacheError::Internal(s) => CacheError::Internal(s.clone()),
        }
    }
}

// IO errors compare by kind only.
impl PartialEq for CacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheError::Io(a), CacheError::Io(b)) => a.kind() == b.kind(),
            (CacheError::MalformedKey(a), CacheError::MalformedKey(b)) => a == b,
            (CacheError::ProviderFetch(a), CacheError::ProviderFetch(b)) => a == b,
            (CacheError::Serialization(a), CacheError::Serialization(b)) => a == b,
            (CacheError::InvalidRequest(a), CacheError::InvalidRequest(b)) => a == b,
            (CacheError::UnknownNamespace(a), CacheError::UnknownNamespace(b)) => a == b,
            (CacheError::Internal(a), CacheError::Internal(b)) => a == b,
            _ => false,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for CacheError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        CacheError::MalformedKey(e.to_string())
    }
}
