// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy shared by every client operation.
//!
//! Local validation errors are raised while building schemas and queries and
//! never reach the network. Transport errors drive node failover. Server
//! errors are surfaced as-is and never retried.

use pilosa_proto::{CodecError, FrameError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::imports::FailedBatch;
use crate::transport::TransportError;

/// Client result type.
pub type Result<T, E = PilosaError> = std::result::Result<T, E>;

/// Every failure a client operation can report.
#[derive(Debug, Error)]
pub enum PilosaError {
    /// Name, label, or key does not match the server's accepted charset.
    #[error("invalid {kind} {value:?}")]
    InvalidIdentifier {
        /// What was being validated (`index name`, `field name`, `label`, `key`).
        kind: &'static str,
        /// The rejected value.
        value: String,
    },
    /// A call was given the wrong number of arguments.
    #[error("{call} expects {expected} argument(s), got {got}")]
    InvalidArgumentCount {
        /// Call name.
        call: &'static str,
        /// Accepted count, e.g. `at least 1`.
        expected: &'static str,
        /// Count supplied.
        got: usize,
    },
    /// Range bounds are out of order or otherwise unusable.
    #[error("{call}: invalid range {detail}")]
    InvalidArgumentRange {
        /// Call name.
        call: &'static str,
        /// The offending bounds.
        detail: String,
    },
    /// A nested argument is not the kind of call the outer call accepts.
    #[error("{call}: argument {position} must be a {expected} call, got {got}")]
    InvalidArgumentType {
        /// Outer call name.
        call: &'static str,
        /// Position of the argument.
        position: usize,
        /// Required argument kind.
        expected: &'static str,
        /// Name of the call that was passed.
        got: String,
    },
    /// An id was given where a key is required, or the other way round.
    #[error("{target} uses {expected}s, got {value}")]
    KeyIdMismatch {
        /// Index or field the identifier addresses.
        target: String,
        /// `key` or `id`.
        expected: &'static str,
        /// The offending identifier.
        value: String,
    },
    /// Field options are inconsistent.
    #[error("invalid options for field {field}: {reason}")]
    InvalidFieldOptions {
        /// Field name.
        field: String,
        /// What is wrong.
        reason: String,
    },
    /// A nested call belongs to a different index than its parent.
    #[error("call on index {found} used inside a query on index {expected}")]
    IndexMismatch {
        /// Index of the outer query.
        expected: String,
        /// Index of the nested call.
        found: String,
    },
    /// `Not` needs the server to track column existence.
    #[error("index {index} does not track existence")]
    ExistenceNotTracked {
        /// Index name.
        index: String,
    },
    /// Local and remote definitions disagree.
    #[error("schema conflict on {}: {option} is {local} locally but {remote} on the server", path(.index, .field.as_deref()))]
    SchemaConflict {
        /// Index name.
        index: String,
        /// Field name, when the conflict is on a field.
        field: Option<String>,
        /// Conflicting option.
        option: &'static str,
        /// Local value.
        local: String,
        /// Server value.
        remote: String,
    },
    /// One or more schema creation operations failed.
    #[error("{} schema operation(s) failed; first: {}", .failures.len(), first_failure(.failures))]
    SchemaApply {
        /// Every failed operation, in execution order.
        failures: Vec<ApplyFailure>,
    },
    /// The index already exists on the server.
    #[error("index {index} already exists")]
    IndexExists {
        /// Index name.
        index: String,
    },
    /// The field already exists on the server.
    #[error("field {index}/{field} already exists")]
    FieldExists {
        /// Index name.
        index: String,
        /// Field name.
        field: String,
    },
    /// Address could not be parsed.
    #[error("invalid address {address:?}")]
    InvalidUri {
        /// The rejected address.
        address: String,
    },
    /// A single transport attempt failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Every node in the cluster failed at the transport level.
    #[error("no available node after {attempts} attempt(s){}", last_cause(.last_error.as_ref()))]
    NoAvailableNode {
        /// Number of nodes tried.
        attempts: usize,
        /// Error from the last node tried.
        last_error: Option<TransportError>,
    },
    /// The server rejected the request.
    #[error("server error ({status}): {message}")]
    QueryExecution {
        /// HTTP status code (200 when the error came inside a successful body).
        status: u16,
        /// Server message.
        message: String,
    },
    /// Response body could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A bitmap payload could not be built.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// A record carries a timestamp but the field has no time quantum.
    #[error("field {field} has no time quantum; timestamp {timestamp} rejected")]
    TimestampNotSupported {
        /// Field name.
        field: String,
        /// The rejected timestamp.
        timestamp: i64,
    },
    /// Some import batches failed.
    #[error("{} import batch(es) failed, {succeeded_batches} succeeded; first error: {first_error}", .failed.len())]
    PartialImportFailure {
        /// Number of batches the server accepted.
        succeeded_batches: usize,
        /// The error of the earliest failed batch.
        first_error: Box<PilosaError>,
        /// Every failed batch with its records, for resubmission.
        failed: Vec<FailedBatch>,
    },
    /// The import stopped on a bad record after some batches were sent.
    #[error("import stopped after {succeeded_batches} accepted and {} failed batch(es): {cause}", .failed.len())]
    ImportAborted {
        /// Read or validation error that stopped the import.
        cause: Box<PilosaError>,
        /// Number of batches the server accepted before the stop.
        succeeded_batches: usize,
        /// Batches sent before the stop that the server rejected.
        failed: Vec<FailedBatch>,
    },
    /// The requested import mode cannot carry this data.
    #[error("cannot import into {field}: {reason}")]
    UnsupportedImportStrategy {
        /// Field name.
        field: String,
        /// Why the strategy does not apply.
        reason: &'static str,
    },
    /// A record source produced an unreadable line.
    #[error("invalid record on line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number.
        line: u64,
        /// What is wrong with it.
        reason: String,
    },
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One failed schema operation.
#[derive(Debug)]
pub struct ApplyFailure {
    /// Index the operation targeted.
    pub index: String,
    /// Field the operation targeted, if any.
    pub field: Option<String>,
    /// Why it failed.
    pub error: PilosaError,
}

fn path(index: &str, field: Option<&str>) -> String {
    match field {
        Some(field) => format!("{index}/{field}"),
        None => index.to_owned(),
    }
}

fn first_failure(failures: &[ApplyFailure]) -> String {
    failures.first().map_or_else(String::new, |f| {
        format!("{}: {}", path(&f.index, f.field.as_deref()), f.error)
    })
}

fn last_cause(err: Option<&TransportError>) -> String {
    err.map_or_else(String::new, |e| format!("; last error: {e}"))
}

impl PilosaError {
    /// True for errors raised locally before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. }
                | Self::InvalidArgumentCount { .. }
                | Self::InvalidArgumentRange { .. }
                | Self::InvalidArgumentType { .. }
                | Self::KeyIdMismatch { .. }
                | Self::InvalidFieldOptions { .. }
                | Self::IndexMismatch { .. }
                | Self::ExistenceNotTracked { .. }
        )
    }
}
