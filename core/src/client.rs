//! Stateless HTTP request builder and response parser for the CouchDB API.
//!
//! # Design
//! `CouchClient` holds only the database URL and carries no mutable state
//! between calls. Each operation is split into a `build_*` method that
//! produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`. `Couch` glues the two halves to a `Transport`; callers
//! with their own HTTP stack can drive the halves directly.
//!
//! The URL's path is the database path. Server-level endpoints
//! (`/_all_dbs`, `/_replicate`) replace it. Document ids and design/view
//! names are percent-encoded one path segment at a time, so `%`, `/`, `?`
//! and `#` inside an id never change which resource is addressed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::doc::parse_id_rev;
use crate::error::{CouchError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    BulkSaveRequest, KeysRequest, MultiDocResponse, ReplicateRequest, ReplicateResponse, Reply,
    Response,
};

const JSON: &str = "application/json";

/// Synchronous, stateless request builder for one CouchDB database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchClient {
    url: Url,
}

impl CouchClient {
    /// Parse `base_url` (scheme, host and database path).
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::from_url(Url::parse(base_url)?))
    }

    pub fn from_url(mut url: Url) -> Self {
        let path = url.path().trim_end_matches('/').to_string();
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The database path, without a trailing slash. Empty when the base URL
    /// points at the server root.
    pub fn db_path(&self) -> &str {
        self.url.path().trim_end_matches('/')
    }

    /// URL of the database path plus `segments`, each percent-encoded as a
    /// single path segment, with `params` as the query.
    fn db_url(&self, segments: &[&str], params: &[(&str, &str)]) -> String {
        let mut url = self.url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        with_query(url, params)
    }

    /// URL of a server-level endpoint; the database path is dropped.
    fn server_url(&self, segments: &[&str]) -> String {
        let mut url = self.url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.clear().extend(segments);
        }
        url.to_string()
    }

    fn doc_url(&self, id: &str) -> String {
        self.db_url(&doc_segments(id), &[])
    }

    fn request(&self, method: HttpMethod, url: String, body: Option<String>) -> HttpRequest {
        HttpRequest {
            method,
            url,
            headers: vec![
                ("content-type".to_string(), JSON.to_string()),
                ("accept".to_string(), JSON.to_string()),
            ],
            body,
        }
    }

    // -----------------------------------------------------------------------
    // Databases
    // -----------------------------------------------------------------------

    pub fn build_all_dbs(&self) -> HttpRequest {
        self.request(HttpMethod::Get, self.server_url(&["_all_dbs"]), None)
    }

    pub fn build_create_db(&self) -> HttpRequest {
        self.request(HttpMethod::Put, self.db_url(&[], &[]), None)
    }

    pub fn build_delete_db(&self) -> HttpRequest {
        self.request(HttpMethod::Delete, self.db_url(&[], &[]), None)
    }

    pub fn build_all_docs(&self) -> HttpRequest {
        let url = self.db_url(&["_all_docs"], &[]);
        self.request(HttpMethod::Get, url, None)
    }

    pub fn parse_all_dbs(&self, response: HttpResponse) -> Result<Vec<String>> {
        check_status(&response)?;
        decode(&response.body)
    }

    pub fn parse_create_db(&self, response: HttpResponse) -> Result<Reply<Response>> {
        reply(response)
    }

    pub fn parse_delete_db(&self, response: HttpResponse) -> Result<Reply<Response>> {
        reply(response)
    }

    /// Ids of every document in the database, in server order.
    pub fn parse_all_docs(&self, response: HttpResponse) -> Result<Vec<String>> {
        check_status(&response)?;
        let listing: MultiDocResponse = decode(&response.body)?;
        Ok(listing.rows.into_iter().filter_map(|row| row.id).collect())
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// `POST` to the database when `doc` has no `_id`, `PUT` to the document
    /// path otherwise. Updates need the current `_rev` inside `doc`.
    pub fn build_save<T: Serialize + ?Sized>(&self, doc: &T) -> Result<HttpRequest> {
        let id_rev = parse_id_rev(doc)?;
        let body = serde_json::to_string(doc).map_err(CouchError::Serialization)?;
        let req = match id_rev.id {
            Some(id) => self.request(HttpMethod::Put, self.doc_url(&id), Some(body)),
            None => self.request(HttpMethod::Post, self.db_url(&[], &[]), Some(body)),
        };
        Ok(req)
    }

    pub fn build_get(&self, id: &str) -> HttpRequest {
        self.request(HttpMethod::Get, self.doc_url(id), None)
    }

    /// The revision travels in `If-Match`.
    pub fn build_delete(&self, id: &str, rev: &str) -> HttpRequest {
        let mut req = self.request(HttpMethod::Delete, self.doc_url(id), None);
        req.headers.push(("if-match".to_string(), rev.to_string()));
        req
    }

    pub fn build_bulk_save<T: Serialize>(&self, docs: &[T]) -> Result<HttpRequest> {
        let body = serde_json::to_string(&BulkSaveRequest { docs })
            .map_err(CouchError::Serialization)?;
        let url = self.db_url(&["_bulk_docs"], &[]);
        Ok(self.request(HttpMethod::Post, url, Some(body)))
    }

    /// `Destination` is `dest`, suffixed with `?rev=` when overwriting an
    /// existing target.
    pub fn build_copy(&self, src: &str, dest: &str, dest_rev: Option<&str>) -> HttpRequest {
        let destination = match dest_rev {
            Some(rev) => format!("{dest}?rev={rev}"),
            None => dest.to_string(),
        };
        let mut req = self.request(HttpMethod::Copy, self.doc_url(src), None);
        req.headers.push(("destination".to_string(), destination));
        req
    }

    /// A 2xx body that still names an `error` is reported as a failure.
    pub fn parse_save(&self, response: HttpResponse) -> Result<Response> {
        check_status(&response)?;
        let res: Response = decode(&response.body)?;
        if let Some(error) = &res.error {
            return Err(CouchError::Server {
                status: response.status,
                error: error.clone(),
                reason: res.reason.clone().unwrap_or_default(),
            });
        }
        Ok(res)
    }

    pub fn parse_get<T: DeserializeOwned>(&self, response: HttpResponse) -> Result<T> {
        check_status(&response)?;
        decode(&response.body)
    }

    pub fn parse_delete(&self, response: HttpResponse) -> Result<Response> {
        check_status(&response)?;
        decode(&response.body)
    }

    /// One entry per submitted document, in submission order. Rejected
    /// documents carry `error`/`reason` instead of failing the call.
    pub fn parse_bulk_save(&self, response: HttpResponse) -> Result<Reply<Vec<Response>>> {
        reply(response)
    }

    pub fn parse_copy(&self, response: HttpResponse) -> Result<Reply<Response>> {
        reply(response)
    }

    // -----------------------------------------------------------------------
    // Views and replication
    // -----------------------------------------------------------------------

    /// `GET` without keys, `POST {"keys": [...]}` with them. `params` are
    /// passed through as the query string; CouchDB expects JSON-encoded
    /// values for key-like parameters (`key`, `startkey`, ...).
    pub fn build_view(
        &self,
        design: &str,
        name: &str,
        params: &[(&str, &str)],
        keys: Option<&[Value]>,
    ) -> Result<HttpRequest> {
        let url = self.db_url(&["_design", design, "_view", name], params);
        let req = match keys {
            Some(keys) => {
                let body = serde_json::to_string(&KeysRequest { keys })
                    .map_err(CouchError::Serialization)?;
                self.request(HttpMethod::Post, url, Some(body))
            }
            None => self.request(HttpMethod::Get, url, None),
        };
        Ok(req)
    }

    pub fn build_replicate(&self, input: &ReplicateRequest) -> Result<HttpRequest> {
        let body = serde_json::to_string(input).map_err(CouchError::Serialization)?;
        Ok(self.request(HttpMethod::Post, self.server_url(&["_replicate"]), Some(body)))
    }

    pub fn parse_view(&self, response: HttpResponse) -> Result<MultiDocResponse> {
        check_status(&response)?;
        decode(&response.body)
    }

    pub fn parse_replicate(&self, response: HttpResponse) -> Result<Reply<ReplicateResponse>> {
        reply(response)
    }
}

/// Path segments for a document id. `_design/` and `_local/` ids keep their
/// prefix as a separate segment; any other `/` is part of the id.
fn doc_segments(id: &str) -> Vec<&str> {
    for prefix in ["_design", "_local"] {
        if let Some(rest) = id.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
            return vec![prefix, rest];
        }
    }
    vec![id]
}

fn with_query(mut url: Url, params: &[(&str, &str)]) -> String {
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    url.to_string()
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    reason: String,
}

/// Map non-2xx statuses to `CouchError::Server`.
///
/// Bodies that are not CouchDB error objects (proxies, load balancers) keep
/// their raw text as the reason.
fn check_status(response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    let (error, reason) = match serde_json::from_str::<ErrorBody>(&response.body) {
        Ok(body) => (body.error, body.reason),
        Err(_) => ("unknown".to_string(), response.body.clone()),
    };
    Err(CouchError::Server {
        status: response.status,
        error,
        reason,
    })
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(CouchError::Deserialization)
}

fn reply<T: DeserializeOwned>(response: HttpResponse) -> Result<Reply<T>> {
    check_status(&response)?;
    Ok(Reply {
        status: response.status,
        body: decode(&response.body)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> CouchClient {
        CouchClient::new("http://localhost:5984/testdb").unwrap()
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn body_json(req: &HttpRequest) -> Value {
        serde_json::from_str(req.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn every_request_speaks_json() {
        let req = client().build_get("doc");
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("accept"), Some("application/json"));
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = CouchClient::new("http://localhost:5984/testdb/").unwrap();
        assert_eq!(client.db_path(), "/testdb");
        assert_eq!(client.build_get("a").url, "http://localhost:5984/testdb/a");
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        let err = CouchClient::new("not a url").unwrap_err();
        assert!(matches!(err, CouchError::InvalidUrl(_)));
    }

    #[test]
    fn create_and_delete_db_target_database_path() {
        let req = client().build_create_db();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://localhost:5984/testdb");
        assert!(req.body.is_none());

        let req = client().build_delete_db();
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.url, "http://localhost:5984/testdb");
    }

    #[test]
    fn all_dbs_ignores_database_path() {
        let req = client().build_all_dbs();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:5984/_all_dbs");
    }

    #[test]
    fn parse_create_db_keeps_status() {
        let reply = client()
            .parse_create_db(response(201, r#"{"ok":true}"#))
            .unwrap();
        assert_eq!(reply.status, 201);
        assert!(reply.body.ok);
    }

    #[test]
    fn parse_create_db_existing_database() {
        let err = client()
            .parse_create_db(response(
                412,
                r#"{"error":"file_exists","reason":"The database could not be created, the file already exists."}"#,
            ))
            .unwrap_err();
        match err {
            CouchError::Server { status, error, .. } => {
                assert_eq!(status, 412);
                assert_eq!(error, "file_exists");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn save_without_id_posts_to_database() {
        let req = client()
            .build_save(&json!({"test1": "value1", "test2": "value2"}))
            .unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:5984/testdb");
        assert_eq!(body_json(&req)["test1"], "value1");
    }

    #[test]
    fn save_with_id_puts_to_document() {
        let req = client()
            .build_save(&json!({"_id": "testcow", "_rev": "1-a", "name": "Fred"}))
            .unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://localhost:5984/testdb/testcow");
        assert_eq!(body_json(&req)["_rev"], "1-a");
    }

    #[test]
    fn save_rejects_scalar_documents() {
        let err = client().build_save(&42).unwrap_err();
        assert!(matches!(err, CouchError::InvalidDocument(_)));
    }

    #[test]
    fn parse_save_conflict() {
        let err = client()
            .parse_save(response(
                409,
                r#"{"error":"conflict","reason":"Document update conflict."}"#,
            ))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn parse_save_error_in_success_body() {
        let err = client()
            .parse_save(response(201, r#"{"error":"forbidden","reason":"nope"}"#))
            .unwrap_err();
        assert!(matches!(
            err,
            CouchError::Server { status: 201, ref error, .. } if error == "forbidden"
        ));
    }

    #[test]
    fn parse_save_returns_id_and_rev() {
        let res = client()
            .parse_save(response(201, r#"{"ok":true,"id":"abc","rev":"1-x"}"#))
            .unwrap();
        assert_eq!(res.id, "abc");
        assert_eq!(res.rev, "1-x");
    }

    #[test]
    fn get_targets_document_path() {
        let req = client().build_get("explicit");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:5984/testdb/explicit");
        assert!(req.body.is_none());
    }

    #[test]
    fn design_document_ids_keep_their_slash() {
        let req = client().build_get("_design/dog");
        assert_eq!(req.url, "http://localhost:5984/testdb/_design/dog");
    }

    #[test]
    fn document_ids_are_percent_encoded() {
        let c = client();
        assert_eq!(c.build_get("a%20b").url, "http://localhost:5984/testdb/a%2520b");
        assert_eq!(c.build_get("a b").url, "http://localhost:5984/testdb/a%20b");
        assert_eq!(c.build_get("100%").url, "http://localhost:5984/testdb/100%25");
        assert_eq!(c.build_get("a/b").url, "http://localhost:5984/testdb/a%2Fb");
        assert_eq!(c.build_get("what?#").url, "http://localhost:5984/testdb/what%3F%23");
    }

    #[test]
    fn encoded_ids_reach_every_document_request() {
        let c = client();
        let save = c.build_save(&json!({"_id": "a%20b"})).unwrap();
        assert_eq!(save.url, "http://localhost:5984/testdb/a%2520b");
        let delete = c.build_delete("a%20b", "1-a");
        assert_eq!(delete.url, "http://localhost:5984/testdb/a%2520b");
        let copy = c.build_copy("a%20b", "c", None);
        assert_eq!(copy.url, "http://localhost:5984/testdb/a%2520b");
    }

    #[test]
    fn design_document_names_are_encoded_after_the_prefix() {
        let req = client().build_get("_design/my docs");
        assert_eq!(req.url, "http://localhost:5984/testdb/_design/my%20docs");
        let req = client().build_get("_local/a/b");
        assert_eq!(req.url, "http://localhost:5984/testdb/_local/a%2Fb");
    }

    #[test]
    fn view_design_and_name_are_encoded() {
        let req = client()
            .build_view("by type", "50%", &[("limit", "1")], None)
            .unwrap();
        assert_eq!(
            req.url,
            "http://localhost:5984/testdb/_design/by%20type/_view/50%25?limit=1"
        );
    }

    #[test]
    fn server_root_client_builds_database_free_urls() {
        let c = CouchClient::new("http://localhost:5984").unwrap();
        assert_eq!(c.build_all_dbs().url, "http://localhost:5984/_all_dbs");
        assert_eq!(c.build_get("a").url, "http://localhost:5984/a");
    }

    #[test]
    fn parse_get_into_caller_type() {
        #[derive(Deserialize)]
        struct Cow {
            #[serde(rename = "_rev")]
            rev: String,
            name: String,
        }
        let cow: Cow = client()
            .parse_get(response(200, r#"{"_id":"c","_rev":"2-b","name":"Fred"}"#))
            .unwrap();
        assert_eq!(cow.rev, "2-b");
        assert_eq!(cow.name, "Fred");
    }

    #[test]
    fn parse_get_not_found() {
        let err = client()
            .parse_get::<Value>(response(404, r#"{"error":"not_found","reason":"missing"}"#))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn parse_get_non_json_error_body() {
        let err = client()
            .parse_get::<Value>(response(502, "Bad Gateway"))
            .unwrap_err();
        match err {
            CouchError::Server { status, error, reason } => {
                assert_eq!(status, 502);
                assert_eq!(error, "unknown");
                assert_eq!(reason, "Bad Gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_get_bad_json() {
        let err = client()
            .parse_get::<Value>(response(200, "not json"))
            .unwrap_err();
        assert!(matches!(err, CouchError::Deserialization(_)));
    }

    #[test]
    fn delete_sends_rev_in_if_match() {
        let req = client().build_delete("deleteme", "1-abc");
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.url, "http://localhost:5984/testdb/deleteme");
        assert_eq!(req.header("if-match"), Some("1-abc"));
        assert!(req.body.is_none());
    }

    #[test]
    fn bulk_save_wraps_docs() {
        let docs = vec![json!({"name": "Hakki"}), json!({"name": "Farb"})];
        let req = client().build_bulk_save(&docs).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:5984/testdb/_bulk_docs");
        assert_eq!(body_json(&req), json!({"docs": docs}));
    }

    #[test]
    fn parse_bulk_save_keeps_per_document_failures() {
        let reply = client()
            .parse_bulk_save(response(
                201,
                r#"[{"ok":true,"id":"a","rev":"1-a"},{"id":"b","error":"conflict","reason":"Document update conflict."}]"#,
            ))
            .unwrap();
        assert_eq!(reply.status, 201);
        assert_eq!(reply.body.len(), 2);
        assert!(reply.body[0].ok);
        assert_eq!(reply.body[1].error.as_deref(), Some("conflict"));
    }

    #[test]
    fn view_without_keys_is_get_with_params() {
        let req = client()
            .build_view("dog", "dog", &[("limit", "5")], None)
            .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(
            req.url,
            "http://localhost:5984/testdb/_design/dog/_view/dog?limit=5"
        );
        assert!(req.body.is_none());
    }

    #[test]
    fn view_with_keys_posts_them() {
        let keys = [json!("dog1"), json!("dog2")];
        let req = client().build_view("dog", "dog", &[], Some(&keys[..])).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:5984/testdb/_design/dog/_view/dog");
        assert_eq!(body_json(&req), json!({"keys": ["dog1", "dog2"]}));
    }

    #[test]
    fn view_params_are_encoded() {
        let req = client()
            .build_view("d", "v", &[("key", "\"a b\"")], None)
            .unwrap();
        assert_eq!(
            req.url,
            "http://localhost:5984/testdb/_design/d/_view/v?key=%22a+b%22"
        );
    }

    #[test]
    fn parse_view_rows() {
        let res = client()
            .parse_view(response(
                200,
                r#"{"total_rows":2,"offset":0,"rows":[{"id":"dog1","key":"dog1","value":null},{"id":"dog2","key":"dog2","value":null}]}"#,
            ))
            .unwrap();
        assert_eq!(res.total_rows, 2);
        assert_eq!(res.rows[1].id.as_deref(), Some("dog2"));
        assert_eq!(res.rows[0].key, json!("dog1"));
    }

    #[test]
    fn parse_all_docs_returns_ids() {
        let ids = client()
            .parse_all_docs(response(
                200,
                r#"{"total_rows":1,"offset":0,"rows":[{"id":"a0000000","key":"a0000000","value":{"rev":"1-a"}}]}"#,
            ))
            .unwrap();
        assert_eq!(ids, vec!["a0000000".to_string()]);
    }

    #[test]
    fn copy_sets_destination() {
        let req = client().build_copy("explicit", "explicit-copy", None);
        assert_eq!(req.method, HttpMethod::Copy);
        assert_eq!(req.url, "http://localhost:5984/testdb/explicit");
        assert_eq!(req.header("destination"), Some("explicit-copy"));
    }

    #[test]
    fn copy_over_existing_target_appends_rev() {
        let req = client().build_copy("a", "b", Some("3-c"));
        assert_eq!(req.header("destination"), Some("b?rev=3-c"));
    }

    #[test]
    fn replicate_posts_to_server_root() {
        let input = ReplicateRequest::new("http://localhost:5984/src", "http://localhost:5984/tar");
        let req = client().build_replicate(&input).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:5984/_replicate");
        assert_eq!(
            body_json(&req),
            json!({"source": "http://localhost:5984/src", "target": "http://localhost:5984/tar"})
        );
    }

    #[test]
    fn parse_replicate_success() {
        let reply = client()
            .parse_replicate(response(202, r#"{"ok":true,"_local_id":"abc+continuous"}"#))
            .unwrap();
        assert_eq!(reply.status, 202);
        assert_eq!(reply.body.local_id.as_deref(), Some("abc+continuous"));
    }
}
