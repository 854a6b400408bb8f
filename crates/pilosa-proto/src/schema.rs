// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema documents exchanged with the server.
//!
//! `GET /schema` answers a [`SchemaDocument`]; index and field creation take
//! an [`OptionsEnvelope`] around [`IndexMeta`] or [`FieldMeta`]. Struct fields
//! are declared in JSON-key order so encoded documents come out sorted.

use serde::{Deserialize, Deserializer, Serialize};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The server's view of all indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Indexes known to the server.
    #[serde(default, deserialize_with = "null_as_default")]
    pub indexes: Vec<IndexInfo>,
}

/// One index as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Index options.
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: IndexMeta,
    /// Fields of the index.
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<FieldInfo>,
    /// Shard width the index was created with (zero when not reported).
    #[serde(default, rename = "shardWidth")]
    pub shard_width: u64,
}

/// Index options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Columns are addressed by string keys.
    #[serde(default)]
    pub keys: bool,
    /// The server tracks which columns exist (required by `Not`).
    #[serde(default, rename = "trackExistence")]
    pub track_existence: bool,
}

/// One field as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Field options.
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: FieldMeta,
}

/// Field options; which members are present depends on the field type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Cache size for set and mutex fields.
    #[serde(default, rename = "cacheSize", skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<u32>,
    /// Cache type for set and mutex fields.
    #[serde(default, rename = "cacheType", skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<String>,
    /// Rows are addressed by string keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<bool>,
    /// Upper bound of an int field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    /// Lower bound of an int field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Time quantum of a time field.
    #[serde(default, rename = "timeQuantum", skip_serializing_if = "Option::is_none")]
    pub time_quantum: Option<String>,
    /// Field type: `set`, `int`, `time`, `mutex` or `bool`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

/// `{"options": ...}` wrapper used by index and field creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsEnvelope<T> {
    /// The wrapped options.
    pub options: T,
}

impl<T: Serialize> OptionsEnvelope<T> {
    /// Encode the envelope as a JSON request body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
