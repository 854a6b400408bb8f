// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client orchestrator: node failover, schema sync, query execution.
//!
//! Every request walks the cluster in order, starting at the first node.
//! Only a [`TransportError`] advances to the next node; any HTTP response,
//! error statuses included, ends the walk. A cluster of N unreachable nodes
//! therefore fails after exactly N attempts.

use pilosa_proto::{
    server_error_message, CodecError, JsonCodec, OptionsEnvelope, QueryCodec, QueryRequest, QueryResponse,
    SchemaDocument, PQL_VERSION,
};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::{debug, instrument, warn};

use crate::cluster::Cluster;
use crate::config::{ClientConfig, ClientOptions};
use crate::error::{ApplyFailure, PilosaError, Result};
use crate::query::{CallOptions, Query};
use crate::schema::{diff, Field, Index, Schema, SchemaOp};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Transport, TransportError};

/// Major server version this client speaks.
pub const SUPPORTED_MAJOR_VERSION: u64 = 1;

const CONFLICT: u16 = 409;

/// Handle to a cluster. Cheap to share by reference across threads.
pub struct Client {
    cluster: Cluster,
    options: ClientOptions,
    transport: Box<dyn Transport>,
    codec: Box<dyn QueryCodec>,
    version_checked: OnceLock<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cluster", &self.cluster)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Client over HTTP.
    pub fn new(cluster: Cluster, options: ClientOptions) -> Result<Self> {
        let transport = HttpTransport::new(&options)?;
        Ok(Self::with_transport(cluster, options, transport))
    }

    /// Client for a single address with default options.
    pub fn from_address(address: &str) -> Result<Self> {
        Self::new(Cluster::from_addresses([address])?, ClientOptions::default())
    }

    /// Client built from a configuration document.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.cluster()?, config.options.clone())
    }

    /// Client over a caller-supplied transport.
    pub fn with_transport(cluster: Cluster, options: ClientOptions, transport: impl Transport + 'static) -> Self {
        Self {
            cluster,
            options,
            transport: Box::new(transport),
            codec: Box::new(JsonCodec),
            version_checked: OnceLock::new(),
        }
    }

    /// Replace the query codec.
    pub fn with_codec(mut self, codec: impl QueryCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Nodes in failover order.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Options the client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Run a query.
    pub fn query<Q: Query + ?Sized>(&self, query: &Q) -> Result<QueryResponse> {
        self.query_with(query, &CallOptions::default())
    }

    /// Run a query with per-request options.
    ///
    /// Results come back one per top-level call, in submission order.
    #[instrument(name = "Client.Query", skip_all, fields(index = %query.index().name()))]
    pub fn query_with<Q: Query + ?Sized>(&self, query: &Q, options: &CallOptions) -> Result<QueryResponse> {
        let request = QueryRequest {
            query: query.serialize(),
            column_attrs: options.column_attrs,
            exclude_columns: options.exclude_columns,
            exclude_row_attrs: options.exclude_row_attrs,
            shards: options.shards.clone(),
        };
        let body = self.codec.encode(&request)?;
        let path = format!("/index/{}/query{}", query.index().name(), request.query_string());
        let http = HttpRequest::post(path, body)
            .header("Content-Type", self.codec.content_type())
            .header("Accept", self.codec.content_type())
            .header("PQL-Version", PQL_VERSION);
        let response = ok_status(self.request(&http)?)?;
        match self.codec.decode(&response.body, &query.result_kinds()) {
            Ok(decoded) => Ok(decoded),
            Err(CodecError::Server(message)) => Err(PilosaError::QueryExecution {
                status: response.status,
                message,
            }),
            Err(other) => Err(other.into()),
        }
    }

    /// Read the server schema.
    #[instrument(name = "Client.Schema", skip_all)]
    pub fn schema(&self) -> Result<Schema> {
        let response = ok_status(self.request(&HttpRequest::get("/schema"))?)?;
        let document: SchemaDocument =
            serde_json::from_slice(&response.body).map_err(|e| PilosaError::Codec(e.into()))?;
        Schema::from_document(&document)
    }

    /// Bring the server up to `schema` and pull server-only entries into it.
    ///
    /// Missing indexes and fields are created; entries on both sides must
    /// agree or the call fails with [`PilosaError::SchemaConflict`] before
    /// anything is created. Nothing is ever deleted.
    #[instrument(name = "Client.SyncSchema", skip_all)]
    pub fn sync_schema(&self, schema: &mut Schema) -> Result<()> {
        let remote = self.schema()?;
        let ops = diff(schema, &remote)?;
        debug!(operations = ops.len(), "schema diff computed");
        let failures = self.run_ops(&ops, |op| match op {
            SchemaOp::CreateIndex { name, .. } => schema.mark_on_server(name, None),
            SchemaOp::CreateField(field) => schema.mark_on_server(field.index_name(), Some(field.name())),
        });
        schema.merge_remote(&remote);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PilosaError::SchemaApply { failures })
        }
    }

    /// Execute creation operations, indexes before their fields.
    ///
    /// An index that already exists counts as created. When an index cannot
    /// be created its fields are skipped; other indexes proceed. All
    /// failures are reported together.
    #[instrument(name = "Client.Apply", skip_all)]
    pub fn apply(&self, ops: &[SchemaOp]) -> Result<()> {
        let failures = self.run_ops(ops, |_| {});
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PilosaError::SchemaApply { failures })
        }
    }

    fn run_ops(&self, ops: &[SchemaOp], mut created: impl FnMut(&SchemaOp)) -> Vec<ApplyFailure> {
        let mut failures = Vec::new();
        let mut failed_indexes: Vec<&str> = Vec::new();
        for op in ops {
            let result = match op {
                SchemaOp::CreateIndex { name, options } => {
                    let body = OptionsEnvelope { options: options.to_meta() };
                    self.create(&format!("/index/{name}"), &body, || PilosaError::IndexExists {
                        index: name.clone(),
                    })
                }
                SchemaOp::CreateField(field) if failed_indexes.contains(&field.index_name()) => {
                    debug!(index = field.index_name(), field = field.name(), "skipping field of failed index");
                    continue;
                }
                SchemaOp::CreateField(field) => self.create_field_request(field),
            };
            match result {
                Ok(()) | Err(PilosaError::IndexExists { .. } | PilosaError::FieldExists { .. }) => created(op),
                Err(error) => {
                    let field = match op {
                        SchemaOp::CreateIndex { name, .. } => {
                            failed_indexes.push(name);
                            None
                        }
                        SchemaOp::CreateField(field) => Some(field.name().to_owned()),
                    };
                    warn!(index = op.index_name(), ?field, %error, "schema operation failed");
                    failures.push(ApplyFailure {
                        index: op.index_name().to_owned(),
                        field,
                        error,
                    });
                }
            }
        }
        failures
    }

    fn create<T: serde::Serialize>(
        &self,
        path: &str,
        body: &OptionsEnvelope<T>,
        exists: impl FnOnce() -> PilosaError,
    ) -> Result<()> {
        let body = body.to_json().map_err(|e| PilosaError::Codec(e.into()))?;
        let request = HttpRequest::post(path, body).header("Content-Type", "application/json");
        let response = self.request(&request)?;
        if response.status == CONFLICT {
            return Err(exists());
        }
        ok_status(response).map(drop)
    }

    fn create_field_request(&self, field: &Field) -> Result<()> {
        let path = format!("/index/{}/field/{}", field.index_name(), field.name());
        self.create(&path, &OptionsEnvelope { options: field.meta() }, || PilosaError::FieldExists {
            index: field.index_name().to_owned(),
            field: field.name().to_owned(),
        })
    }

    /// Create an index; fails with [`PilosaError::IndexExists`] if present.
    #[instrument(name = "Client.CreateIndex", skip_all, fields(index = index.name()))]
    pub fn create_index(&self, index: &Index) -> Result<()> {
        self.create(&format!("/index/{}", index.name()), &OptionsEnvelope { options: index.meta() }, || {
            PilosaError::IndexExists {
                index: index.name().to_owned(),
            }
        })
    }

    /// Create an index unless it already exists.
    pub fn ensure_index(&self, index: &Index) -> Result<()> {
        match self.create_index(index) {
            Err(PilosaError::IndexExists { .. }) => Ok(()),
            other => other,
        }
    }

    /// Create a field; fails with [`PilosaError::FieldExists`] if present.
    #[instrument(name = "Client.CreateField", skip_all, fields(index = field.index_name(), field = field.name()))]
    pub fn create_field(&self, field: &Field) -> Result<()> {
        self.create_field_request(field)
    }

    /// Create a field unless it already exists.
    pub fn ensure_field(&self, field: &Field) -> Result<()> {
        match self.create_field(field) {
            Err(PilosaError::FieldExists { .. }) => Ok(()),
            other => other,
        }
    }

    /// Delete an index and all its data.
    #[instrument(name = "Client.DeleteIndex", skip_all, fields(index = index.name()))]
    pub fn delete_index(&self, index: &Index) -> Result<()> {
        let path = format!("/index/{}", index.name());
        ok_status(self.request(&HttpRequest::delete(path))?).map(drop)
    }

    /// Delete a field and all its data.
    #[instrument(name = "Client.DeleteField", skip_all, fields(index = field.index_name(), field = field.name()))]
    pub fn delete_field(&self, field: &Field) -> Result<()> {
        let path = format!("/index/{}/field/{}", field.index_name(), field.name());
        ok_status(self.request(&HttpRequest::delete(path))?).map(drop)
    }

    /// Send `request` with failover, after the one-time version check.
    pub(crate) fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if !self.options.skip_version_check {
            self.version_checked.get_or_init(|| self.check_version());
        }
        self.send_with_failover(request)
    }

    fn send_with_failover(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut last_error: Option<TransportError> = None;
        let mut attempts = 0;
        for node in self.cluster.nodes() {
            attempts += 1;
            debug!(node = %node.uri(), method = ?request.method, path = %request.path, "sending request");
            match self.transport.send(node, request) {
                Ok(response) => {
                    if let Some(warning) = &response.warning {
                        warn!(node = %node.uri(), %warning, "server warning");
                    }
                    return Ok(response);
                }
                Err(err) if !err.is_node_failure() => {
                    warn!(node = %node.uri(), error = %err, "response lost after the request was sent");
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(node = %node.uri(), error = %err, "node unreachable");
                    last_error = Some(err);
                }
            }
        }
        Err(PilosaError::NoAvailableNode { attempts, last_error })
    }

    fn check_version(&self) {
        #[derive(Deserialize)]
        struct VersionInfo {
            version: String,
        }
        let response = match self.send_with_failover(&HttpRequest::get("/version")) {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!(status = response.status, "server version unavailable");
                return;
            }
            Err(err) => {
                warn!(error = %err, "server version check failed");
                return;
            }
        };
        let version = match serde_json::from_slice::<VersionInfo>(&response.body) {
            Ok(info) => info.version,
            Err(err) => {
                warn!(error = %err, "unreadable server version");
                return;
            }
        };
        match major_version(&version) {
            Some(SUPPORTED_MAJOR_VERSION) => debug!(%version, "server version supported"),
            _ => warn!(%version, supported = SUPPORTED_MAJOR_VERSION, "unsupported server version"),
        }
    }
}

/// Major component of a version string such as `v1.3.0` or `1.3`.
pub fn major_version(version: &str) -> Option<u64> {
    let trimmed = version.trim().trim_start_matches('v');
    trimmed.split(['.', '-']).next()?.parse().ok()
}

/// Turn a non-2xx response into [`PilosaError::QueryExecution`].
pub(crate) fn ok_status(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(PilosaError::QueryExecution {
            status: response.status,
            message: server_error_message(&response.body),
        })
    }
}
