// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for the Pilosa client.
//!
//! This crate is the codec side of the client: it knows how query requests
//! and responses look on the wire, how the server describes its schema, and
//! how a bitmap-transfer import request is framed. It knows nothing about
//! nodes, retries, or the schema model; `pilosa-client` calls into it.
//!
//! * [`bitmap`] – the server's roaring bitmap format.
//! * [`codec`] – the [`QueryCodec`] seam and the default [`JsonCodec`].
//! * [`response`] – typed results decoded from a query response.
//! * [`schema`] – JSON documents exchanged with `/schema`, `/index` and `/field`.
//! * [`wire`] – length-delimited framing for `import-roaring` payloads.

pub mod bitmap;
pub mod codec;
pub mod response;
pub mod schema;
pub mod wire;

pub use bitmap::{decode_bitmap, encode_bitmap};
pub use codec::{server_error_message, CodecError, JsonCodec, QueryCodec, QueryRequest};
pub use response::{
    AttrValue, ColumnItem, CountResultItem, FieldRow, GroupCount, QueryResponse, QueryResult,
    ResultKind, RowIdentifiers, RowResult, ValueCount,
};
pub use schema::{FieldInfo, FieldMeta, IndexInfo, IndexMeta, OptionsEnvelope, SchemaDocument};
pub use wire::{FrameError, ImportRoaringRequest, RoaringView};

/// Query language version sent with every query request.
pub const PQL_VERSION: &str = "1.0";
