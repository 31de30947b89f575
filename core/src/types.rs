//! Wire DTOs for the CouchDB HTTP API.
//!
//! # Design
//! Documents themselves are caller-defined; only the envelopes CouchDB wraps
//! around them live here. Fields CouchDB may omit are defaulted so a partial
//! body still deserializes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server acknowledgment for a single write, or the `error`/`reason` pair of
/// a rejected one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rev: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A parsed body together with the HTTP status it arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    pub status: u16,
    pub body: T,
}

/// The identity fields of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRev {
    pub id: Option<String>,
    pub rev: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BulkSaveRequest<'a, T> {
    pub docs: &'a [T],
}

#[derive(Debug, Serialize)]
pub(crate) struct KeysRequest<'a> {
    pub keys: &'a [Value],
}

/// One entry of a view or `_all_docs` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// A view query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiDocResponse {
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub offset: u64,
    pub rows: Vec<Row>,
}

/// Body of `POST /_replicate`. Options left at their default are omitted
/// from the JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cancel: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub continuous: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub create_target: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, String>,
}

impl ReplicateRequest {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Self::default()
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Acknowledgment of a replication request. Continuous replications are
/// identified by `_local_id`, one-shot ones by `session_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(rename = "_local_id", default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}
