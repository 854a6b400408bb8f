// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Query codec seam and the default JSON codec.
//!
//! The server accepts the query text as the request body and answers with a
//! JSON document `{"results": [...], "columnAttrs": [...]}`, or
//! `{"error": "..."}` when the query itself is at fault.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::response::{
    ColumnItem, CountResultItem, GroupCount, QueryResponse, QueryResult, ResultKind,
    RowIdentifiers, RowResult, ValueCount,
};

/// Errors raised while encoding a request or decoding a response.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Body was not valid JSON, or a result did not have the expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The server reported an error inside an otherwise successful response.
    #[error("server error: {0}")]
    Server(String),
    /// Number of results differs from the number of submitted calls.
    #[error("expected {expected} results, got {got}")]
    ResultCountMismatch {
        /// Number of submitted calls.
        expected: usize,
        /// Number of results in the response.
        got: usize,
    },
    /// A result could not be read as the variant its call produces.
    #[error("result {position} is not a valid {kind:?} result: {detail}")]
    UnexpectedShape {
        /// Position of the result in the response.
        position: usize,
        /// Kind expected from the call.
        kind: ResultKind,
        /// What went wrong.
        detail: String,
    },
}

/// A query as handed to the codec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    /// Serialized query text.
    pub query: String,
    /// Return column attributes for row results.
    pub column_attrs: bool,
    /// Leave columns out of row results.
    pub exclude_columns: bool,
    /// Leave row attributes out of row results.
    pub exclude_row_attrs: bool,
    /// Restrict the query to these shards.
    pub shards: Vec<u64>,
}

impl QueryRequest {
    /// Request for `query` with default options.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// URL query string carrying the request options, empty when all
    /// options are at their defaults. Parameters appear in a fixed order.
    pub fn query_string(&self) -> String {
        let mut params = Vec::new();
        if self.column_attrs {
            params.push("columnAttrs=true".to_owned());
        }
        if self.exclude_columns {
            params.push("excludeColumns=true".to_owned());
        }
        if self.exclude_row_attrs {
            params.push("excludeRowAttrs=true".to_owned());
        }
        if !self.shards.is_empty() {
            let shards: Vec<String> = self.shards.iter().map(u64::to_string).collect();
            params.push(format!("shards={}", shards.join(",")));
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// Encodes query requests and decodes query responses.
///
/// Implementations must be safe to share between threads; the client holds
/// one codec for its whole lifetime.
pub trait QueryCodec: Send + Sync {
    /// MIME type of encoded requests and accepted responses.
    fn content_type(&self) -> &'static str;

    /// Encode the request body.
    fn encode(&self, request: &QueryRequest) -> Result<Vec<u8>, CodecError>;

    /// Decode a successful response body. `kinds` lists the result kind of
    /// each submitted call; results past the end of `kinds`, and results
    /// whose kind is [`ResultKind::Unknown`], are inferred from the payload.
    fn decode(&self, body: &[u8], kinds: &[ResultKind]) -> Result<QueryResponse, CodecError>;
}

/// Plain-text request, JSON response codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    results: Option<Vec<Value>>,
    #[serde(default, rename = "columnAttrs")]
    column_attrs: Option<Vec<ColumnItem>>,
    #[serde(default)]
    error: Option<String>,
}

impl QueryCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, request: &QueryRequest) -> Result<Vec<u8>, CodecError> {
        Ok(request.query.as_bytes().to_vec())
    }

    fn decode(&self, body: &[u8], kinds: &[ResultKind]) -> Result<QueryResponse, CodecError> {
        let raw: RawResponse = serde_json::from_slice(body)?;
        if let Some(message) = raw.error.filter(|m| !m.is_empty()) {
            return Err(CodecError::Server(message));
        }
        let values = raw.results.unwrap_or_default();
        let exact = !kinds.contains(&ResultKind::Unknown);
        if exact && !kinds.is_empty() && kinds.len() != values.len() {
            return Err(CodecError::ResultCountMismatch {
                expected: kinds.len(),
                got: values.len(),
            });
        }
        let results = values
            .into_iter()
            .enumerate()
            .map(|(position, value)| {
                let kind = kinds.get(position).copied().unwrap_or(ResultKind::Unknown);
                decode_result(position, kind, value)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResponse {
            results,
            columns: raw.column_attrs.unwrap_or_default(),
        })
    }
}

fn decode_result(position: usize, kind: ResultKind, value: Value) -> Result<QueryResult, CodecError> {
    let kind = match kind {
        ResultKind::Unknown => infer_kind(&value),
        known => known,
    };
    let shape = |e: serde_json::Error| CodecError::UnexpectedShape {
        position,
        kind,
        detail: e.to_string(),
    };
    let result = match kind {
        ResultKind::Row => QueryResult::Row(serde_json::from_value::<RowResult>(value).map_err(shape)?),
        ResultKind::Pairs => {
            let items: Option<Vec<CountResultItem>> = serde_json::from_value(value).map_err(shape)?;
            QueryResult::Pairs(items.unwrap_or_default())
        }
        ResultKind::Count => QueryResult::Count(serde_json::from_value(value).map_err(shape)?),
        ResultKind::Value => QueryResult::Value(serde_json::from_value::<ValueCount>(value).map_err(shape)?),
        ResultKind::Changed => QueryResult::Changed(serde_json::from_value(value).map_err(shape)?),
        ResultKind::RowIdentifiers => {
            QueryResult::RowIdentifiers(serde_json::from_value::<RowIdentifiers>(value).map_err(shape)?)
        }
        ResultKind::GroupCounts => {
            let groups: Option<Vec<GroupCount>> = serde_json::from_value(value).map_err(shape)?;
            QueryResult::GroupCounts(groups.unwrap_or_default())
        }
        ResultKind::Null | ResultKind::Unknown => QueryResult::Null,
    };
    Ok(result)
}

fn infer_kind(value: &Value) -> ResultKind {
    match value {
        Value::Null => ResultKind::Null,
        Value::Bool(_) => ResultKind::Changed,
        Value::Number(_) => ResultKind::Count,
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) if first.contains_key("group") => ResultKind::GroupCounts,
            _ => ResultKind::Pairs,
        },
        Value::Object(map) => {
            if map.contains_key("value") && map.contains_key("count") {
                ResultKind::Value
            } else if map.contains_key("rows")
                || (map.contains_key("keys") && !map.contains_key("attrs") && !map.contains_key("columns"))
            {
                ResultKind::RowIdentifiers
            } else {
                ResultKind::Row
            }
        }
        Value::String(_) => ResultKind::Null,
    }
}

/// Extract a human readable message from an error response body.
///
/// The server answers either `{"error": "..."}` or plain text.
pub fn server_error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => String::from_utf8_lossy(body).trim().to_owned(),
    }
}
