// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory stand-in for a Pilosa cluster.
//!
//! Serves `/version`, `/schema`, index and field creation and deletion,
//! queries, and `import-roaring`, and records every request it sees.
#![allow(dead_code, missing_docs, clippy::unwrap_used, clippy::expect_used)]

use pilosa_client::{
    Client, ClientOptions, Cluster, HttpRequest, HttpResponse, Method, Node, Transport, TransportError,
};
use pilosa_proto::{
    decode_bitmap, FieldInfo, FieldMeta, ImportRoaringRequest, IndexInfo, IndexMeta, OptionsEnvelope, SchemaDocument,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One request as the fake saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub node: String,
    pub method: Method,
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }
}

type Responder = Box<dyn Fn(&str) -> Option<HttpResponse> + Send>;

struct State {
    version: String,
    indexes: BTreeMap<String, (IndexMeta, BTreeMap<String, FieldMeta>)>,
    unreachable: BTreeSet<String>,
    interrupted: BTreeSet<String>,
    requests: Vec<Recorded>,
    responder: Option<Responder>,
    failing_paths: BTreeSet<String>,
}

#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                version: "v1.4.0".into(),
                indexes: BTreeMap::new(),
                unreachable: BTreeSet::new(),
                interrupted: BTreeSet::new(),
                requests: Vec::new(),
                responder: None,
                failing_paths: BTreeSet::new(),
            })),
        }
    }
}

pub fn quiet_options() -> ClientOptions {
    ClientOptions {
        skip_version_check: true,
        ..ClientOptions::default()
    }
}

impl FakeServer {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Client over this fake for `addresses`, version check disabled.
    pub fn client(&self, addresses: &[&str]) -> Client {
        self.client_with(addresses, quiet_options())
    }

    pub fn client_with(&self, addresses: &[&str], options: ClientOptions) -> Client {
        let cluster = Cluster::from_addresses(addresses.iter().copied()).unwrap();
        Client::with_transport(cluster, options, self.clone())
    }

    pub fn set_version(&self, version: &str) {
        self.state().version = version.to_owned();
    }

    /// Refuse connections to `address` (normalized form, `http://host:port`).
    pub fn take_down(&self, address: &str) {
        self.state().unreachable.insert(address.to_owned());
    }

    /// Drop the connection to `address` while the response body is read.
    pub fn interrupt(&self, address: &str) {
        self.state().interrupted.insert(address.to_owned());
    }

    /// Answer queries with `f(query_text)` when it returns a response.
    pub fn respond_with(&self, f: impl Fn(&str) -> Option<HttpResponse> + Send + 'static) {
        self.state().responder = Some(Box::new(f));
    }

    /// Answer every request to exactly `path` with a 500.
    pub fn fail_path(&self, path: &str) {
        self.state().failing_paths.insert(path.to_owned());
    }

    pub fn add_index(&self, name: &str, meta: IndexMeta) {
        self.state().indexes.insert(name.to_owned(), (meta, BTreeMap::new()));
    }

    pub fn add_field(&self, index: &str, field: &str, meta: FieldMeta) {
        let mut state = self.state();
        state.indexes.get_mut(index).unwrap().1.insert(field.to_owned(), meta);
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.state().indexes.contains_key(name)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state().requests.clone()
    }

    /// Requests whose path starts with `prefix`.
    pub fn requests_to(&self, prefix: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.path.starts_with(prefix)).collect()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    fn document(state: &State) -> SchemaDocument {
        SchemaDocument {
            indexes: state
                .indexes
                .iter()
                .map(|(name, (meta, fields))| IndexInfo {
                    name: name.clone(),
                    options: *meta,
                    fields: fields
                        .iter()
                        .map(|(name, options)| FieldInfo {
                            name: name.clone(),
                            options: options.clone(),
                        })
                        .collect(),
                    shard_width: 1 << 20,
                })
                .collect(),
        }
    }

    fn route(state: &mut State, request: &HttpRequest) -> HttpResponse {
        let path = request.path.split('?').next().unwrap_or_default();
        if state.failing_paths.contains(path) {
            return HttpResponse::new(500, r#"{"error":"internal failure"}"#);
        }
        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match (request.method, parts.as_slice()) {
            (Method::Get, ["version"]) => HttpResponse::new(200, format!(r#"{{"version":"{}"}}"#, state.version)),
            (Method::Get, ["schema"]) => HttpResponse::new(200, serde_json::to_vec(&Self::document(state)).unwrap()),
            (Method::Post, ["index", index]) => {
                if state.indexes.contains_key(*index) {
                    return HttpResponse::new(409, r#"{"error":"index already exists"}"#);
                }
                let body: OptionsEnvelope<IndexMeta> = serde_json::from_slice(&request.body).unwrap();
                state.indexes.insert((*index).to_owned(), (body.options, BTreeMap::new()));
                HttpResponse::new(200, "{}")
            }
            (Method::Delete, ["index", index]) => match state.indexes.remove(*index) {
                Some(_) => HttpResponse::new(200, "{}"),
                None => HttpResponse::new(404, r#"{"error":"index not found"}"#),
            },
            (Method::Post, ["index", index, "field", field]) => {
                let Some((_, fields)) = state.indexes.get_mut(*index) else {
                    return HttpResponse::new(404, r#"{"error":"index not found"}"#);
                };
                if fields.contains_key(*field) {
                    return HttpResponse::new(409, r#"{"error":"field already exists"}"#);
                }
                let body: OptionsEnvelope<FieldMeta> = serde_json::from_slice(&request.body).unwrap();
                fields.insert((*field).to_owned(), body.options);
                HttpResponse::new(200, "{}")
            }
            (Method::Delete, ["index", index, "field", field]) => {
                match state.indexes.get_mut(*index).and_then(|(_, f)| f.remove(*field)) {
                    Some(_) => HttpResponse::new(200, "{}"),
                    None => HttpResponse::new(404, r#"{"error":"field not found"}"#),
                }
            }
            (Method::Post, ["index", _, "query"]) => {
                let text = String::from_utf8_lossy(&request.body).into_owned();
                if let Some(response) = state.responder.as_ref().and_then(|f| f(&text)) {
                    return response;
                }
                let results = vec!["true"; top_level_calls(&text)].join(",");
                HttpResponse::new(200, format!(r#"{{"results":[{results}]}}"#))
            }
            (Method::Post, ["index", _, "field", _, "import-roaring", _]) => {
                let readable = ImportRoaringRequest::decode(&request.body)
                    .is_ok_and(|req| req.views.iter().all(|view| decode_bitmap(&view.data).is_ok()));
                if readable {
                    HttpResponse::new(200, "")
                } else {
                    HttpResponse::new(400, r#"{"error":"unreadable roaring payload"}"#)
                }
            }
            _ => HttpResponse::new(404, r#"{"error":"not found"}"#),
        }
    }
}

impl Transport for FakeServer {
    fn send(&self, node: &Node, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.state();
        let address = node.uri().normalize();
        state.requests.push(Recorded {
            node: address.clone(),
            method: request.method,
            path: request.path.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });
        if state.unreachable.contains(&address) {
            return Err(TransportError::ConnectFailed {
                node: address,
                reason: "connection refused".into(),
            });
        }
        let response = Self::route(&mut state, request);
        if state.interrupted.contains(&address) {
            return Err(TransportError::ResponseInterrupted {
                node: address,
                status: response.status,
                reason: "connection reset".into(),
            });
        }
        Ok(response)
    }
}

/// Number of calls at nesting depth zero.
pub fn top_level_calls(query: &str) -> usize {
    let mut depth = 0_usize;
    let mut calls = 0;
    let mut quoted: Option<char> = None;
    for ch in query.chars() {
        match (quoted, ch) {
            (Some(q), c) if c == q => quoted = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quoted = Some(ch),
            (None, '(') => {
                if depth == 0 {
                    calls += 1;
                }
                depth += 1;
            }
            (None, ')') => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    calls
}
