//! Call-through client: build, execute, parse.
//!
//! Every method issues exactly one request through the `Transport` and
//! returns the parsed outcome. Nothing is cached between calls.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::CouchClient;
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, UreqTransport};
use crate::types::{MultiDocResponse, ReplicateRequest, ReplicateResponse, Reply, Response};

/// A CouchDB database handle bound to a transport.
#[derive(Clone)]
pub struct Couch<T = UreqTransport> {
    client: CouchClient,
    transport: T,
}

impl Couch<UreqTransport> {
    /// Connect to the database at `base_url` over the default ureq transport.
    /// No request is made until the first operation.
    pub fn connect(base_url: &str) -> Result<Self> {
        Ok(Self::with_transport(
            CouchClient::new(base_url)?,
            UreqTransport::new(),
        ))
    }
}

impl<T: Transport> Couch<T> {
    pub fn with_transport(client: CouchClient, transport: T) -> Self {
        Self { client, transport }
    }

    pub fn client(&self) -> &CouchClient {
        &self.client
    }

    fn exec(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "couch request");
        let response = self.transport.execute(&request)?;
        if response.is_success() {
            debug!(status = response.status, "couch response");
        } else {
            warn!(
                method = %request.method,
                url = %request.url,
                status = response.status,
                "couch request failed"
            );
        }
        Ok(response)
    }

    pub fn all_dbs(&self) -> Result<Vec<String>> {
        let response = self.exec(self.client.build_all_dbs())?;
        self.client.parse_all_dbs(response)
    }

    pub fn create_db(&self) -> Result<Reply<Response>> {
        let response = self.exec(self.client.build_create_db())?;
        self.client.parse_create_db(response)
    }

    pub fn delete_db(&self) -> Result<Reply<Response>> {
        let response = self.exec(self.client.build_delete_db())?;
        self.client.parse_delete_db(response)
    }

    pub fn all_docs(&self) -> Result<Vec<String>> {
        let response = self.exec(self.client.build_all_docs())?;
        self.client.parse_all_docs(response)
    }

    /// Create or update `doc`. Without an `_id` the server assigns one.
    pub fn save<D: Serialize + ?Sized>(&self, doc: &D) -> Result<Response> {
        let response = self.exec(self.client.build_save(doc)?)?;
        self.client.parse_save(response)
    }

    pub fn get<D: DeserializeOwned>(&self, id: &str) -> Result<D> {
        let response = self.exec(self.client.build_get(id))?;
        self.client.parse_get(response)
    }

    pub fn delete(&self, id: &str, rev: &str) -> Result<Response> {
        let response = self.exec(self.client.build_delete(id, rev))?;
        self.client.parse_delete(response)
    }

    pub fn bulk_save<D: Serialize>(&self, docs: &[D]) -> Result<Reply<Vec<Response>>> {
        let response = self.exec(self.client.build_bulk_save(docs)?)?;
        self.client.parse_bulk_save(response)
    }

    pub fn view(
        &self,
        design: &str,
        name: &str,
        params: &[(&str, &str)],
        keys: Option<&[Value]>,
    ) -> Result<MultiDocResponse> {
        let response = self.exec(self.client.build_view(design, name, params, keys)?)?;
        self.client.parse_view(response)
    }

    pub fn copy(&self, src: &str, dest: &str, dest_rev: Option<&str>) -> Result<Reply<Response>> {
        let response = self.exec(self.client.build_copy(src, dest, dest_rev))?;
        self.client.parse_copy(response)
    }

    pub fn replicate(&self, request: &ReplicateRequest) -> Result<Reply<ReplicateResponse>> {
        let response = self.exec(self.client.build_replicate(request)?)?;
        self.client.parse_replicate(response)
    }
}
