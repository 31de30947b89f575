//! Error types for the CouchDB client.
//!
//! # Design
//! Server-reported failures all land in `Server`, carrying the HTTP status
//! and CouchDB's `error`/`reason` pair. Transport failures are boxed but
//! otherwise passed through untouched so callers can downcast to the
//! transport's own error type.

use std::error::Error as StdError;

/// Errors returned by `CouchClient` and `Couch` operations.
#[derive(Debug, thiserror::Error)]
pub enum CouchError {
    /// The server answered with a non-2xx status.
    #[error("code: {status}, error: {error}, reason: {reason}")]
    Server {
        status: u16,
        error: String,
        reason: String,
    },

    /// The request never produced a response (DNS, refused connection, timeout).
    #[error("transport failed: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A document did not serialize to a JSON object.
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl CouchError {
    /// HTTP status of a server-reported failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            CouchError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

pub type Result<T> = std::result::Result<T, CouchError>;
