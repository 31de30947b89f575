//! In-memory server speaking the subset of the CouchDB HTTP API that
//! `couch-core` uses.
//!
//! Databases map document ids to JSON objects. Revisions are
//! `{generation}-{32 hex}` and every update or delete must name the current
//! one. Views are synthesized: view `{v}` of any design document emits one
//! row per non-design document whose `type` field equals `{v}`, keyed by
//! document id with a `null` value.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub type Docs = BTreeMap<String, Value>;
pub type Store = Arc<RwLock<HashMap<String, Docs>>>;

type Reply = Result<(StatusCode, Json<Value>), Failure>;
type Params = Query<HashMap<String, String>>;

/// A CouchDB-shaped `{error, reason}` response.
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    error: &'static str,
    reason: String,
}

impl Failure {
    fn new(status: StatusCode, error: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            error,
            reason: reason.into(),
        }
    }

    fn missing_db() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "Database does not exist.")
    }

    fn missing_doc() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "missing")
    }

    fn conflict() -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", "Document update conflict.")
    }

    fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", reason)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let body = json!({"error": self.error, "reason": self.reason});
        (self.status, Json(body)).into_response()
    }
}

pub fn app() -> Router {
    let store: Store = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/_all_dbs", get(all_dbs))
        .route("/_replicate", post(replicate))
        .route("/{db}", put(create_db).delete(delete_db).post(create_doc))
        .route("/{db}/_all_docs", get(all_docs))
        .route("/{db}/_bulk_docs", post(bulk_docs))
        .route("/{db}/_design/{design}", any(design_doc))
        .route("/{db}/_design/{design}/_view/{view}", get(view).post(view))
        .route("/{db}/{id}", any(document))
        .with_state(store)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Databases
// ---------------------------------------------------------------------------

async fn all_dbs(State(store): State<Store>) -> Json<Vec<String>> {
    let mut names: Vec<String> = store.read().await.keys().cloned().collect();
    names.sort();
    Json(names)
}

fn valid_db_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('a'..='z'))
        && chars.all(|c| {
            matches!(c, 'a'..='z' | '0'..='9' | '_' | '$' | '(' | ')' | '+' | '-' | '/')
        })
}

async fn create_db(State(store): State<Store>, Path(db): Path<String>) -> Reply {
    if !valid_db_name(&db) {
        return Err(Failure::new(
            StatusCode::BAD_REQUEST,
            "illegal_database_name",
            format!(
                "Name: '{db}'. Only lowercase characters (a-z), digits (0-9), and any of \
                 the characters _, $, (, ), +, -, and / are allowed. Must begin with a letter."
            ),
        ));
    }
    let mut dbs = store.write().await;
    if dbs.contains_key(&db) {
        return Err(Failure::new(
            StatusCode::PRECONDITION_FAILED,
            "file_exists",
            "The database could not be created, the file already exists.",
        ));
    }
    dbs.insert(db.clone(), Docs::new());
    tracing::info!(db = %db, "database created");
    Ok((StatusCode::CREATED, Json(json!({"ok": true}))))
}

async fn delete_db(State(store): State<Store>, Path(db): Path<String>) -> Reply {
    match store.write().await.remove(&db) {
        Some(_) => {
            tracing::info!(db = %db, "database deleted");
            Ok((StatusCode::OK, Json(json!({"ok": true}))))
        }
        None => Err(Failure::missing_db()),
    }
}

fn database<'a>(dbs: &'a mut HashMap<String, Docs>, name: &str) -> Result<&'a mut Docs, Failure> {
    dbs.get_mut(name).ok_or_else(Failure::missing_db)
}

async fn all_docs(State(store): State<Store>, Path(db): Path<String>) -> Reply {
    let mut dbs = store.write().await;
    let docs = database(&mut dbs, &db)?;
    let rows: Vec<Value> = docs
        .iter()
        .map(|(id, doc)| json!({"id": id, "key": id, "value": {"rev": doc["_rev"]}}))
        .collect();
    Ok((
        StatusCode::OK,
        Json(json!({"total_rows": rows.len(), "offset": 0, "rows": rows})),
    ))
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, Failure> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(Failure::bad_request("Document must be a JSON object")),
        Err(_) => Err(Failure::bad_request("invalid UTF-8 JSON")),
    }
}

fn new_rev(previous: Option<&str>) -> String {
    let generation = previous
        .and_then(|rev| rev.split('-').next())
        .and_then(|g| g.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

fn current_rev(docs: &Docs, id: &str) -> Option<String> {
    docs.get(id)
        .and_then(|doc| doc.get("_rev"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Store `fields` under `id` when `rev` names the current revision (or both
/// are absent). Returns the new revision.
fn write_doc(
    docs: &mut Docs,
    id: &str,
    mut fields: Map<String, Value>,
    rev: Option<&str>,
) -> Result<String, Failure> {
    let current = current_rev(docs, id);
    if current.as_deref() != rev {
        return Err(Failure::conflict());
    }
    let rev = new_rev(current.as_deref());
    fields.insert("_id".to_string(), Value::String(id.to_string()));
    fields.insert("_rev".to_string(), Value::String(rev.clone()));
    docs.insert(id.to_string(), Value::Object(fields));
    Ok(rev)
}

fn remove_doc(docs: &mut Docs, id: &str, rev: Option<&str>) -> Result<String, Failure> {
    let current = current_rev(docs, id).ok_or_else(Failure::missing_doc)?;
    if Some(current.as_str()) != rev {
        return Err(Failure::conflict());
    }
    docs.remove(id);
    Ok(new_rev(Some(&current)))
}

fn str_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

async fn create_doc(State(store): State<Store>, Path(db): Path<String>, body: Bytes) -> Reply {
    let fields = parse_object(&body)?;
    let id = str_field(&fields, "_id")
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let rev = str_field(&fields, "_rev").map(str::to_string);

    let mut dbs = store.write().await;
    let docs = database(&mut dbs, &db)?;
    let rev = write_doc(docs, &id, fields, rev.as_deref())?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"ok": true, "id": id, "rev": rev})),
    ))
}

async fn document(
    State(store): State<Store>,
    method: Method,
    Path((db, id)): Path<(String, String)>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    document_op(store, method, &db, &id, params, headers, body).await
}

async fn design_doc(
    State(store): State<Store>,
    method: Method,
    Path((db, design)): Path<(String, String)>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let id = format!("_design/{design}");
    document_op(store, method, &db, &id, params, headers, body).await
}

async fn document_op(
    store: Store,
    method: Method,
    db: &str,
    id: &str,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let mut dbs = store.write().await;
    let docs = database(&mut dbs, db)?;

    match method.as_str() {
        "GET" => {
            let doc = docs.get(id).cloned().ok_or_else(Failure::missing_doc)?;
            Ok((StatusCode::OK, Json(doc)))
        }
        "PUT" => {
            let fields = parse_object(&body)?;
            let rev = str_field(&fields, "_rev")
                .map(str::to_string)
                .or_else(|| params.get("rev").cloned());
            let rev = write_doc(docs, id, fields, rev.as_deref())?;
            tracing::debug!(db, id, rev = %rev, "document written");
            Ok((
                StatusCode::CREATED,
                Json(json!({"ok": true, "id": id, "rev": rev})),
            ))
        }
        "DELETE" => {
            let rev = params.get("rev").cloned().or_else(|| if_match(&headers));
            let rev = remove_doc(docs, id, rev.as_deref())?;
            Ok((
                StatusCode::OK,
                Json(json!({"ok": true, "id": id, "rev": rev})),
            ))
        }
        "COPY" => {
            let destination = headers
                .get("destination")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Failure::bad_request("Destination header is mandatory for COPY."))?;
            let (dest_id, dest_rev) = match destination.split_once("?rev=") {
                Some((dest_id, rev)) => (dest_id.to_string(), Some(rev.to_string())),
                None => (destination.to_string(), None),
            };
            let source = docs.get(id).cloned().ok_or_else(Failure::missing_doc)?;
            let Value::Object(mut fields) = source else {
                return Err(Failure::missing_doc());
            };
            fields.remove("_id");
            fields.remove("_rev");
            let rev = write_doc(docs, &dest_id, fields, dest_rev.as_deref())?;
            Ok((
                StatusCode::CREATED,
                Json(json!({"ok": true, "id": dest_id, "rev": rev})),
            ))
        }
        _ => Err(Failure::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Only DELETE,GET,HEAD,POST,PUT,COPY allowed",
        )),
    }
}

fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
}

#[derive(Deserialize)]
struct BulkDocs {
    docs: Vec<Value>,
}

async fn bulk_docs(State(store): State<Store>, Path(db): Path<String>, body: Bytes) -> Reply {
    let input: BulkDocs = serde_json::from_slice(&body)
        .map_err(|_| Failure::bad_request("Request body must be a JSON object with a docs array"))?;

    let mut dbs = store.write().await;
    let docs = database(&mut dbs, &db)?;

    let results: Vec<Value> = input
        .docs
        .into_iter()
        .map(|doc| {
            let Value::Object(fields) = doc else {
                return json!({"error": "bad_request", "reason": "Document must be a JSON object"});
            };
            let id = str_field(&fields, "_id")
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let rev = str_field(&fields, "_rev").map(str::to_string);
            let deleted = fields.get("_deleted").and_then(Value::as_bool) == Some(true);
            let outcome = if deleted {
                remove_doc(docs, &id, rev.as_deref())
            } else {
                write_doc(docs, &id, fields, rev.as_deref())
            };
            match outcome {
                Ok(rev) => json!({"ok": true, "id": id, "rev": rev}),
                Err(failure) => json!({"id": id, "error": failure.error, "reason": failure.reason}),
            }
        })
        .collect();
    Ok((StatusCode::CREATED, Json(Value::Array(results))))
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct KeysBody {
    keys: Vec<Value>,
}

fn flag(params: &HashMap<String, String>, name: &str) -> bool {
    params.get(name).map(String::as_str) == Some("true")
}

fn count(params: &HashMap<String, String>, name: &str) -> Result<Option<usize>, Failure> {
    params
        .get(name)
        .map(|v| {
            v.parse::<usize>().map_err(|_| {
                Failure::new(
                    StatusCode::BAD_REQUEST,
                    "query_parse_error",
                    format!("Invalid value for integer: \"{v}\""),
                )
            })
        })
        .transpose()
}

async fn view(
    State(store): State<Store>,
    Path((db, _design, view)): Path<(String, String, String)>,
    Query(params): Params,
    body: Bytes,
) -> Reply {
    let keys = if body.is_empty() {
        None
    } else {
        let input: KeysBody = serde_json::from_slice(&body)
            .map_err(|_| Failure::bad_request("`keys` member must be an array."))?;
        Some(input.keys)
    };
    let skip = count(&params, "skip")?.unwrap_or(0);
    let limit = count(&params, "limit")?;

    let mut dbs = store.write().await;
    let docs = database(&mut dbs, &db)?;

    let emitted: Vec<(&String, &Value)> = docs
        .iter()
        .filter(|(id, doc)| {
            !id.starts_with("_design/")
                && doc.get("type").and_then(Value::as_str) == Some(view.as_str())
        })
        .collect();
    let total_rows = emitted.len();

    let mut selected: Vec<(&String, &Value)> = match &keys {
        Some(keys) => keys
            .iter()
            .flat_map(|key| emitted.iter().filter(move |(id, _)| key.as_str() == Some(id.as_str())))
            .copied()
            .collect(),
        None => emitted,
    };
    if flag(&params, "descending") {
        selected.reverse();
    }

    let include_docs = flag(&params, "include_docs");
    let rows: Vec<Value> = selected
        .into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(id, doc)| {
            let mut row = json!({"id": id, "key": id, "value": null});
            if include_docs {
                row["doc"] = doc.clone();
            }
            row
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({"total_rows": total_rows, "offset": skip, "rows": rows})),
    ))
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ReplicateBody {
    source: String,
    target: String,
    #[serde(default)]
    cancel: bool,
    #[serde(default)]
    continuous: bool,
    #[serde(default)]
    create_target: bool,
    #[serde(default)]
    doc_ids: Vec<String>,
}

/// Database name from either a bare name or a full database URL.
fn endpoint_db(endpoint: &str) -> String {
    endpoint
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(endpoint)
        .to_string()
}

async fn replicate(State(store): State<Store>, body: Bytes) -> Reply {
    let input: ReplicateBody = serde_json::from_slice(&body)
        .map_err(|_| Failure::bad_request("Request body must contain source and target"))?;
    if input.cancel {
        return Ok((StatusCode::OK, Json(json!({"ok": true}))));
    }

    let source = endpoint_db(&input.source);
    let target = endpoint_db(&input.target);
    let mut dbs = store.write().await;

    let copied: Vec<(String, Value)> = database(&mut dbs, &source)?
        .iter()
        .filter(|(id, _)| input.doc_ids.is_empty() || input.doc_ids.contains(*id))
        .map(|(id, doc)| (id.clone(), doc.clone()))
        .collect();
    if !dbs.contains_key(&target) {
        if !input.create_target {
            return Err(Failure::new(
                StatusCode::NOT_FOUND,
                "db_not_found",
                format!("could not open {}", input.target),
            ));
        }
        dbs.insert(target.clone(), Docs::new());
    }
    let docs = database(&mut dbs, &target)?;
    let written = copied.len();
    docs.extend(copied);
    tracing::info!(source = %source, target = %target, written, "replicated");

    if input.continuous {
        let local_id = format!("{}+continuous", Uuid::new_v4().simple());
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({"ok": true, "_local_id": local_id})),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "session_id": Uuid::new_v4().simple().to_string(),
                "docs_written": written,
            })),
        ))
    }
}
