// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed query results.
//!
//! A [`QueryResponse`] holds one [`QueryResult`] per submitted call, in
//! submission order. Which variant a result takes is decided by the call that
//! produced it ([`ResultKind`]), not guessed from the payload, except for raw
//! queries where the kind is [`ResultKind::Unknown`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute value attached to a row or a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean attribute.
    Bool(bool),
    /// Signed integer attribute.
    Int(i64),
    /// Floating point attribute.
    Float(f64),
    /// String attribute.
    String(String),
}

impl fmt::Display for AttrValue {
    /// Renders the value the way the query language expects it: strings are
    /// JSON-quoted, everything else is bare.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => match serde_json::to_string(s) {
                Ok(quoted) => f.write_str(&quoted),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Which result variant a call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// Row-producing calls (`Row`, `Union`, `Range`, …).
    Row,
    /// `TopN` pairs.
    Pairs,
    /// `Count`.
    Count,
    /// `Sum`, `Min`, `Max`.
    Value,
    /// Mutations reporting whether anything changed.
    Changed,
    /// `Rows`.
    RowIdentifiers,
    /// `GroupBy`.
    GroupCounts,
    /// Calls that return nothing (attribute setters).
    Null,
    /// Raw queries; the variant is inferred from the payload.
    Unknown,
}

/// Columns (or column keys) of a row plus its attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowResult {
    /// Row attributes.
    #[serde(default, rename = "attrs")]
    pub attributes: BTreeMap<String, AttrValue>,
    /// Column ids, for indexes without keys.
    #[serde(default)]
    pub columns: Vec<u64>,
    /// Column keys, for indexes with keys.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// One `TopN` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResultItem {
    /// Row id (zero when the field uses keys).
    #[serde(default)]
    pub id: u64,
    /// Row key, when the field uses keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Number of columns set in the row.
    pub count: u64,
}

/// Result of `Sum`, `Min` and `Max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    /// Aggregated value.
    pub value: i64,
    /// Number of columns that contributed.
    pub count: u64,
}

/// Result of `Rows`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIdentifiers {
    /// Row ids.
    #[serde(default)]
    pub rows: Vec<u64>,
    /// Row keys, when the field uses keys.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// One member of a `GroupBy` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRow {
    /// Field name.
    pub field: String,
    /// Row id.
    #[serde(default, rename = "rowID")]
    pub row_id: u64,
    /// Row key, when the field uses keys.
    #[serde(default, rename = "rowKey", skip_serializing_if = "Option::is_none")]
    pub row_key: Option<String>,
}

/// One `GroupBy` group with its count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    /// The rows forming the group, one per `Rows` argument.
    pub group: Vec<FieldRow>,
    /// Number of columns in the intersection.
    pub count: u64,
}

/// Attributes of a column, returned when column attributes are requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnItem {
    /// Column id.
    #[serde(default)]
    pub id: u64,
    /// Column key, for indexes with keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Column attributes.
    #[serde(default, rename = "attrs")]
    pub attributes: BTreeMap<String, AttrValue>,
}

/// One result, exactly one variant per call.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Row-producing call.
    Row(RowResult),
    /// `TopN`.
    Pairs(Vec<CountResultItem>),
    /// `Count`.
    Count(u64),
    /// `Sum`, `Min`, `Max`.
    Value(ValueCount),
    /// Mutation.
    Changed(bool),
    /// `Rows`.
    RowIdentifiers(RowIdentifiers),
    /// `GroupBy`.
    GroupCounts(Vec<GroupCount>),
    /// Nothing returned.
    Null,
}

impl QueryResult {
    /// The kind of this result.
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Row(_) => ResultKind::Row,
            Self::Pairs(_) => ResultKind::Pairs,
            Self::Count(_) => ResultKind::Count,
            Self::Value(_) => ResultKind::Value,
            Self::Changed(_) => ResultKind::Changed,
            Self::RowIdentifiers(_) => ResultKind::RowIdentifiers,
            Self::GroupCounts(_) => ResultKind::GroupCounts,
            Self::Null => ResultKind::Null,
        }
    }

    /// The row, if this is a row result.
    pub fn row(&self) -> Option<&RowResult> {
        match self {
            Self::Row(row) => Some(row),
            _ => None,
        }
    }

    /// The `TopN` pairs, if this is a pairs result.
    pub fn count_items(&self) -> Option<&[CountResultItem]> {
        match self {
            Self::Pairs(items) => Some(items),
            _ => None,
        }
    }

    /// The count, if this is a `Count` result.
    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    /// The aggregated value, if this is a `Sum`/`Min`/`Max` result.
    pub fn value(&self) -> Option<ValueCount> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether the mutation changed anything, if this is a mutation result.
    pub fn changed(&self) -> Option<bool> {
        match self {
            Self::Changed(b) => Some(*b),
            _ => None,
        }
    }
}

/// Decoded query response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Results, positionally aligned with the submitted calls.
    pub results: Vec<QueryResult>,
    /// Column attributes; empty unless requested.
    pub columns: Vec<ColumnItem>,
}

impl QueryResponse {
    /// First result, if any.
    pub fn result(&self) -> Option<&QueryResult> {
        self.results.first()
    }

    /// First column item, if any.
    pub fn column(&self) -> Option<&ColumnItem> {
        self.columns.first()
    }
}
