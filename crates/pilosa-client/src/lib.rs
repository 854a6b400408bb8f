// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! pilosa-client: blocking client for the Pilosa bitmap index server.
//!
//! Build a [`Schema`] of indexes and fields, bring the server up to it with
//! [`Client::sync_schema`], compose queries with the builders on [`Index`]
//! and [`Field`], and run them with [`Client::query`]. Bulk loads go through
//! [`Client::import_field`] and [`Client::import_values`].
//!
//! ```no_run
//! use pilosa_client::{Client, FieldOptions, IndexOptions, Schema};
//!
//! # fn main() -> pilosa_client::Result<()> {
//! let client = Client::from_address("localhost:10101")?;
//! let mut schema = Schema::new();
//! let repository = schema.index("repository", IndexOptions::default())?;
//! let stargazer = repository.field("stargazer", FieldOptions::set())?;
//! client.sync_schema(&mut schema)?;
//!
//! let response = client.query(&stargazer.row(5)?)?;
//! if let Some(row) = response.result().and_then(|r| r.row()) {
//!     println!("{:?}", row.columns);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Requests go to the first node of the [`Cluster`] and move on to the next
//! only when a node cannot be reached. The library logs through `tracing`
//! and never installs a subscriber.

pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod imports;
pub mod query;
pub mod schema;
pub mod timestamp;
pub mod transport;
pub mod uri;
pub mod validator;

pub use client::{Client, SUPPORTED_MAJOR_VERSION};
pub use cluster::{Cluster, Node};
pub use config::{ClientConfig, ClientOptions, ConfigError};
pub use error::{ApplyFailure, PilosaError, Result};
pub use imports::{
    csv_column_reader, csv_value_reader, CsvFormat, CsvValueFormat, EpochSeconds, FailedBatch, FailedRecords,
    ImportOptions, ImportRecord, ImportStrategy, ImportSummary, ImportValue, QueryTime, TimeParser,
};
pub use query::{Aggregate, Call, CallOptions, CompareOp, IdKey, PqlBatchQuery, PqlQuery, Query, RowsOptions};
pub use schema::{
    diff, CacheType, Field, FieldOptions, FieldType, Index, IndexOptions, IndexRef, Schema, SchemaOp, TimeQuantum,
    TimeUnit,
};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport, TransportError};
pub use uri::{Scheme, Uri};

pub use pilosa_proto::{
    AttrValue, ColumnItem, CountResultItem, FieldRow, GroupCount, JsonCodec, QueryCodec, QueryResponse, QueryResult,
    ResultKind, RowIdentifiers, RowResult, ValueCount,
};
