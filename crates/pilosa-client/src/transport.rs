// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP transport seam.
//!
//! The client sees a transport as one blocking call per request:
//! `send(node, request) -> response | TransportError`. A transport error
//! means the node could not be talked to; any HTTP status, even an error
//! status, is a response. [`HttpTransport`] is the `reqwest` implementation;
//! tests substitute an in-memory one.

use std::error::Error as _;
use thiserror::Error;
use tracing::debug;

use crate::cluster::Node;
use crate::config::{ClientOptions, ConfigError};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

/// One request, independent of the node it is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Path and query string, starting with `/`.
    pub path: String,
    /// Extra headers.
    pub headers: Vec<(&'static str, String)>,
    /// Body; empty for `GET` and `DELETE`.
    pub body: Vec<u8>,
}

impl HttpRequest {
    fn new(method: Method, path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, Vec::new())
    }

    /// `POST path` with `body`.
    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(Method::Post, path, body)
    }

    /// `DELETE path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path, Vec::new())
    }

    /// Add a header.
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// What came back from a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Body.
    pub body: Vec<u8>,
    /// `Warning` header, if the server sent one.
    pub warning: Option<String>,
}

impl HttpResponse {
    /// Response with `status` and `body` and no warning.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            warning: None,
        }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A node could not be talked to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, reset, or otherwise failed.
    #[error("connection to {node} failed: {reason}")]
    ConnectFailed {
        /// Node address.
        node: String,
        /// Underlying error.
        reason: String,
    },
    /// Connect or request timeout elapsed.
    #[error("request to {node} timed out")]
    Timeout {
        /// Node address.
        node: String,
    },
    /// TLS handshake or certificate failure.
    #[error("tls error talking to {node}: {reason}")]
    Tls {
        /// Node address.
        node: String,
        /// Underlying error.
        reason: String,
    },
    /// The node answered but its response body was cut off. The request may
    /// have been executed.
    #[error("response from {node} (status {status}) was interrupted: {reason}")]
    ResponseInterrupted {
        /// Node address.
        node: String,
        /// Status line received before the failure.
        status: u16,
        /// Underlying error.
        reason: String,
    },
}

impl TransportError {
    /// True when the request never reached the node, so another node may be
    /// tried.
    #[must_use]
    pub const fn is_node_failure(&self) -> bool {
        !matches!(self, Self::ResponseInterrupted { .. })
    }
}

/// Sends requests to nodes. Shared by every thread using the client.
pub trait Transport: Send + Sync {
    /// Send `request` to `node` and wait for the full response.
    fn send(&self, node: &Node, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest` transport with connection pooling and per-node retries.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    retry_count: u32,
}

impl HttpTransport {
    /// Build a transport from client options.
    ///
    /// `pool_size_per_route` bounds idle connections per node; `reqwest`
    /// has no global pool limit, so `pool_size_total` is not enforced here.
    pub fn new(options: &ClientOptions) -> Result<Self, ConfigError> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(options.connect_timeout())
            .timeout(options.socket_timeout())
            .pool_max_idle_per_host(options.pool_size_per_route)
            .user_agent(concat!("pilosa-client/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(options.tls_skip_verify);
        if let Some(path) = &options.tls_ca_certificate_path {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| ConfigError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(path) = &options.tls_key_path {
            let pem = std::fs::read(path)?;
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| ConfigError::Tls(e.to_string()))?;
            builder = builder.identity(identity);
        }
        let client = builder.build().map_err(|e| ConfigError::Tls(e.to_string()))?;
        Ok(Self {
            client,
            retry_count: options.retry_count.max(1),
        })
    }

    fn send_once(&self, node: &Node, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, node.url(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        let response = builder.send().map_err(|e| classify(node, &e))?;
        let status = response.status().as_u16();
        let warning = response
            .headers()
            .get(reqwest::header::WARNING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .map_err(|e| TransportError::ResponseInterrupted {
                node: node.uri().to_string(),
                status,
                reason: cause_chain(&e),
            })?
            .to_vec();
        Ok(HttpResponse { status, body, warning })
    }
}

impl Transport for HttpTransport {
    fn send(&self, node: &Node, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut attempt = 1;
        loop {
            match self.send_once(node, request) {
                Err(TransportError::ConnectFailed { reason, .. }) if attempt < self.retry_count => {
                    debug!(node = %node.uri(), attempt, %reason, "retrying connection");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn cause_chain(err: &reqwest::Error) -> String {
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    reason
}

fn classify(node: &Node, err: &reqwest::Error) -> TransportError {
    let node = node.uri().to_string();
    if err.is_timeout() {
        return TransportError::Timeout { node };
    }
    // rustls failures surface as connect errors; tell them apart by the cause chain.
    let reason = cause_chain(err);
    let lower = reason.to_ascii_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
        TransportError::Tls { node, reason }
    } else {
        TransportError::ConnectFailed { node, reason }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::uri::Uri;

    #[test]
    fn request_builders_set_method_and_headers() {
        let req = HttpRequest::post("/index/i/query", b"Row(f=1)".to_vec()).header("PQL-Version", "1.0");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.headers, vec![("PQL-Version", "1.0".to_owned())]);
        assert!(HttpRequest::get("/schema").body.is_empty());
        assert_eq!(HttpRequest::delete("/index/i").method, Method::Delete);
    }

    #[test]
    fn only_interrupted_responses_keep_the_node() {
        let node = || "http://a:10101".to_owned();
        let reason = || "reset".to_owned();
        assert!(TransportError::ConnectFailed { node: node(), reason: reason() }.is_node_failure());
        assert!(TransportError::Timeout { node: node() }.is_node_failure());
        assert!(TransportError::Tls { node: node(), reason: reason() }.is_node_failure());
        assert!(!TransportError::ResponseInterrupted { node: node(), status: 200, reason: reason() }.is_node_failure());
    }

    #[test]
    fn success_is_2xx() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(409, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn unreachable_node_is_a_connect_failure() {
        let options = ClientOptions {
            connect_timeout_ms: 500,
            retry_count: 1,
            ..ClientOptions::default()
        };
        let transport = HttpTransport::new(&options).unwrap();
        // port 1 on loopback refuses connections
        let node = Node::new(Uri::parse("127.0.0.1:1").unwrap());
        let err = transport.send(&node, &HttpRequest::get("/version")).unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { .. } | TransportError::Timeout { .. }));
    }
}
