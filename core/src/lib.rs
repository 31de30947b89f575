//! Synchronous client for CouchDB-style document databases.
//!
//! # Overview
//! `CouchClient` builds `HttpRequest` values and parses `HttpResponse`
//! values without touching the network. `Couch` pairs it with a `Transport`
//! (ureq by default) and performs one blocking request per call.
//!
//! ```no_run
//! use couch_core::Couch;
//! use serde_json::json;
//!
//! let db = Couch::connect("http://localhost:5984/animals")?;
//! db.create_db()?;
//! let saved = db.save(&json!({"name": "Savannah", "type": "dog"}))?;
//! let dog: serde_json::Value = db.get(&saved.id)?;
//! db.delete(&saved.id, dog["_rev"].as_str().unwrap_or_default())?;
//! # Ok::<(), couch_core::CouchError>(())
//! ```
//!
//! # Design
//! - `CouchClient` holds only the base URL; it is `Clone + Send + Sync`.
//! - Each operation is split into `build_*` and `parse_*`, so the I/O
//!   boundary is explicit and the core is testable without a server.
//! - Non-2xx statuses become `CouchError::Server`; transport failures are
//!   passed through boxed. Nothing is retried.

pub mod client;
pub mod couch;
pub mod doc;
pub mod error;
pub mod http;
pub mod transport;
pub mod types;

pub use client::CouchClient;
pub use couch::Couch;
pub use doc::{parse_id_rev, remarshal};
pub use error::{CouchError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use transport::{Transport, UreqTransport};
pub use types::{
    IdRev, MultiDocResponse, ReplicateRequest, ReplicateResponse, Reply, Response, Row,
};
