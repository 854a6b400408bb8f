// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Query model.
//!
//! Builders on [`Index`] and [`Field`] validate their arguments and return
//! [`PqlQuery`] values wrapping one [`Call`]. Serialization is the `Display`
//! form of the call tree and depends on nothing but the tree, so equal
//! queries always produce identical text.
//!
//! Canonical text:
//!
//! * arguments are separated by `,` without spaces;
//! * ids are bare integers, keys are single-quoted;
//! * keyword arguments appear in a fixed order per call;
//! * attribute maps are emitted sorted by name;
//! * a batch is the concatenation of its calls.

use pilosa_proto::{AttrValue, ResultKind};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PilosaError, Result};
use crate::schema::{Field, FieldType, Index, IndexRef};
use crate::timestamp::{format_query_time, quantize};
use crate::validator::{validate_key, validate_label};

/// A row or column identifier: numeric id or string key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdKey {
    /// Numeric id.
    Id(u64),
    /// String key.
    Key(String),
}

impl IdKey {
    /// True for keys.
    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key(_))
    }

    /// The id, if this is one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Key(_) => None,
        }
    }
}

impl fmt::Display for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Key(key) => write!(f, "'{key}'"),
        }
    }
}

impl From<u64> for IdKey {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for IdKey {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for IdKey {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

/// Comparison operator of a BSI range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `==`
    Eq,
    /// `!=`
    Neq,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
            Self::Neq => "!=",
        }
    }
}

/// Aggregate over an int field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// `Sum`
    Sum,
    /// `Min`
    Min,
    /// `Max`
    Max,
}

impl Aggregate {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "Sum",
            Self::Min => "Min",
            Self::Max => "Max",
        }
    }
}

/// Server-side options wrapped around a call by `Options(...)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Return column attributes.
    pub column_attrs: bool,
    /// Leave columns out of row results.
    pub exclude_columns: bool,
    /// Leave row attributes out of row results.
    pub exclude_row_attrs: bool,
    /// Restrict the call to these shards.
    pub shards: Vec<u64>,
}

/// Optional arguments of `Rows`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowsOptions {
    /// Start after this row.
    pub previous: Option<IdKey>,
    /// Return at most this many rows.
    pub limit: Option<u64>,
    /// Only rows with this column set.
    pub column: Option<IdKey>,
}

/// One node of a query tree. Closed set; every variant has one text form.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `Row(f=1)`
    Row {
        /// Field name.
        field: String,
        /// Row.
        row: IdKey,
    },
    /// `Set(10,f=1)` or `Set(10,f=1,2017-04-24T12:00)`
    Set {
        /// Field name.
        field: String,
        /// Row.
        row: IdKey,
        /// Column.
        column: IdKey,
        /// Quantized timestamp.
        timestamp: Option<i64>,
    },
    /// `Clear(10,f=1)`
    Clear {
        /// Field name.
        field: String,
        /// Row.
        row: IdKey,
        /// Column.
        column: IdKey,
    },
    /// `Set(10,f=42)` on an int field.
    SetValue {
        /// Field name.
        field: String,
        /// Column.
        column: IdKey,
        /// Value.
        value: i64,
    },
    /// `ClearRow(f=1)`
    ClearRow {
        /// Field name.
        field: String,
        /// Row.
        row: IdKey,
    },
    /// `Store(Row(g=1),f=5)`
    Store {
        /// Row-producing source.
        source: Box<Call>,
        /// Target field.
        field: String,
        /// Target row.
        row: IdKey,
    },
    /// `Union(...)`
    Union(Vec<Call>),
    /// `Intersect(...)`
    Intersect(Vec<Call>),
    /// `Difference(...)`
    Difference(Vec<Call>),
    /// `Xor(...)`
    Xor(Vec<Call>),
    /// `Not(...)`
    Not(Box<Call>),
    /// `Count(...)`
    Count(Box<Call>),
    /// `TopN(f,Row(..),n=10,field='category',filters=[80,81])`
    TopN {
        /// Field name.
        field: String,
        /// Number of rows to return.
        n: u64,
        /// Restrict counting to this row.
        filter: Option<Box<Call>>,
        /// Attribute name and accepted values.
        attr_filter: Option<(String, Vec<AttrValue>)>,
    },
    /// `Range(f=1,2017-01-01T00:00,2018-01-01T00:00)`
    TimeRange {
        /// Field name.
        field: String,
        /// Row.
        row: IdKey,
        /// Start timestamp.
        start: i64,
        /// End timestamp.
        end: i64,
    },
    /// `Range(f < 10)`
    Compare {
        /// Field name.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Operand.
        value: i64,
    },
    /// `Range(f >< [10,20])`
    Between {
        /// Field name.
        field: String,
        /// Inclusive lower bound.
        low: i64,
        /// Inclusive upper bound.
        high: i64,
    },
    /// `Range(f != null)`
    NotNull {
        /// Field name.
        field: String,
    },
    /// `Sum(Row(..),field='f')`, likewise `Min` and `Max`.
    Aggregate {
        /// Which aggregate.
        op: Aggregate,
        /// Field name.
        field: String,
        /// Restrict to this row.
        filter: Option<Box<Call>>,
    },
    /// `Rows(field='f',previous=1,limit=10,column=5)`
    Rows {
        /// Field name.
        field: String,
        /// Optional arguments.
        options: RowsOptions,
    },
    /// `GroupBy(Rows(..),Rows(..),limit=10,filter=Row(..))`
    GroupBy {
        /// `Rows` calls to group by.
        rows: Vec<Call>,
        /// Maximum number of groups.
        limit: Option<u64>,
        /// Restrict to this row.
        filter: Option<Box<Call>>,
    },
    /// `Options(Row(..),columnAttrs=true,shards=[1,3])`
    Options {
        /// Wrapped call.
        call: Box<Call>,
        /// Options.
        options: CallOptions,
    },
    /// `SetRowAttrs(f,1,active=true,name="x")`
    SetRowAttrs {
        /// Field name.
        field: String,
        /// Row.
        row: IdKey,
        /// Attributes, sorted by label.
        attrs: BTreeMap<String, AttrValue>,
    },
    /// `SetColumnAttrs(5,happy=true)`
    SetColumnAttrs {
        /// Column.
        column: IdKey,
        /// Attributes, sorted by label.
        attrs: BTreeMap<String, AttrValue>,
    },
    /// Unvalidated query text, sent as is.
    Raw(String),
}

impl Call {
    /// Call name as it appears in query text (`Raw` for raw queries).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Row { .. } => "Row",
            Self::Set { .. } | Self::SetValue { .. } => "Set",
            Self::Clear { .. } => "Clear",
            Self::ClearRow { .. } => "ClearRow",
            Self::Store { .. } => "Store",
            Self::Union(_) => "Union",
            Self::Intersect(_) => "Intersect",
            Self::Difference(_) => "Difference",
            Self::Xor(_) => "Xor",
            Self::Not(_) => "Not",
            Self::Count(_) => "Count",
            Self::TopN { .. } => "TopN",
            Self::TimeRange { .. } | Self::Compare { .. } | Self::Between { .. } | Self::NotNull { .. } => "Range",
            Self::Aggregate { op, .. } => op.as_str(),
            Self::Rows { .. } => "Rows",
            Self::GroupBy { .. } => "GroupBy",
            Self::Options { .. } => "Options",
            Self::SetRowAttrs { .. } => "SetRowAttrs",
            Self::SetColumnAttrs { .. } => "SetColumnAttrs",
            Self::Raw(_) => "Raw",
        }
    }

    /// Kind of result the server returns for this call.
    pub fn result_kind(&self) -> ResultKind {
        match self {
            Self::Row { .. }
            | Self::Union(_)
            | Self::Intersect(_)
            | Self::Difference(_)
            | Self::Xor(_)
            | Self::Not(_)
            | Self::TimeRange { .. }
            | Self::Compare { .. }
            | Self::Between { .. }
            | Self::NotNull { .. } => ResultKind::Row,
            Self::Set { .. } | Self::Clear { .. } | Self::SetValue { .. } | Self::ClearRow { .. } | Self::Store { .. } => {
                ResultKind::Changed
            }
            Self::Count(_) => ResultKind::Count,
            Self::TopN { .. } => ResultKind::Pairs,
            Self::Aggregate { .. } => ResultKind::Value,
            Self::Rows { .. } => ResultKind::RowIdentifiers,
            Self::GroupBy { .. } => ResultKind::GroupCounts,
            Self::Options { call, .. } => call.result_kind(),
            Self::SetRowAttrs { .. } | Self::SetColumnAttrs { .. } => ResultKind::Null,
            Self::Raw(_) => ResultKind::Unknown,
        }
    }

    /// True for calls usable where a row is expected. Raw queries count as
    /// row calls since they are not checked.
    pub fn is_row_call(&self) -> bool {
        match self {
            Self::Raw(_) => true,
            Self::Options { .. } => false,
            _ => self.result_kind() == ResultKind::Row,
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, calls: &[Call]) -> fmt::Result {
    for (i, call) in calls.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{call}")?;
    }
    Ok(())
}

fn write_attrs(f: &mut fmt::Formatter<'_>, attrs: &BTreeMap<String, AttrValue>) -> fmt::Result {
    for (i, (name, value)) in attrs.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{name}={value}")?;
    }
    Ok(())
}

fn write_time(f: &mut fmt::Formatter<'_>, timestamp: i64) -> fmt::Result {
    let text = format_query_time(timestamp).map_err(|_| fmt::Error)?;
    f.write_str(&text)
}

fn write_numbers(f: &mut fmt::Formatter<'_>, values: &[u64]) -> fmt::Result {
    f.write_str("[")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{v}")?;
    }
    f.write_str("]")
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row { field, row } => write!(f, "Row({field}={row})"),
            Self::Set {
                field,
                row,
                column,
                timestamp,
            } => {
                write!(f, "Set({column},{field}={row}")?;
                if let Some(ts) = timestamp {
                    f.write_str(",")?;
                    write_time(f, *ts)?;
                }
                f.write_str(")")
            }
            Self::Clear { field, row, column } => write!(f, "Clear({column},{field}={row})"),
            Self::SetValue { field, column, value } => write!(f, "Set({column},{field}={value})"),
            Self::ClearRow { field, row } => write!(f, "ClearRow({field}={row})"),
            Self::Store { source, field, row } => write!(f, "Store({source},{field}={row})"),
            Self::Union(calls) | Self::Intersect(calls) | Self::Difference(calls) | Self::Xor(calls) => {
                write!(f, "{}(", self.name())?;
                write_list(f, calls)?;
                f.write_str(")")
            }
            Self::Not(call) => write!(f, "Not({call})"),
            Self::Count(call) => write!(f, "Count({call})"),
            Self::TopN {
                field,
                n,
                filter,
                attr_filter,
            } => {
                write!(f, "TopN({field}")?;
                if let Some(filter) = filter {
                    write!(f, ",{filter}")?;
                }
                write!(f, ",n={n}")?;
                if let Some((name, values)) = attr_filter {
                    write!(f, ",field='{name}',filters=[")?;
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            f.write_str(",")?;
                        }
                        write!(f, "{v}")?;
                    }
                    f.write_str("]")?;
                }
                f.write_str(")")
            }
            Self::TimeRange { field, row, start, end } => {
                write!(f, "Range({field}={row},")?;
                write_time(f, *start)?;
                f.write_str(",")?;
                write_time(f, *end)?;
                f.write_str(")")
            }
            Self::Compare { field, op, value } => write!(f, "Range({field} {} {value})", op.as_str()),
            Self::Between { field, low, high } => write!(f, "Range({field} >< [{low},{high}])"),
            Self::NotNull { field } => write!(f, "Range({field} != null)"),
            Self::Aggregate { op, field, filter } => {
                write!(f, "{}(", op.as_str())?;
                if let Some(filter) = filter {
                    write!(f, "{filter},")?;
                }
                write!(f, "field='{field}')")
            }
            Self::Rows { field, options } => {
                write!(f, "Rows(field='{field}'")?;
                if let Some(previous) = &options.previous {
                    write!(f, ",previous={previous}")?;
                }
                if let Some(limit) = options.limit {
                    write!(f, ",limit={limit}")?;
                }
                if let Some(column) = &options.column {
                    write!(f, ",column={column}")?;
                }
                f.write_str(")")
            }
            Self::GroupBy { rows, limit, filter } => {
                f.write_str("GroupBy(")?;
                write_list(f, rows)?;
                if let Some(limit) = limit {
                    write!(f, ",limit={limit}")?;
                }
                if let Some(filter) = filter {
                    write!(f, ",filter={filter}")?;
                }
                f.write_str(")")
            }
            Self::Options { call, options } => {
                write!(f, "Options({call}")?;
                if options.column_attrs {
                    f.write_str(",columnAttrs=true")?;
                }
                if options.exclude_columns {
                    f.write_str(",excludeColumns=true")?;
                }
                if options.exclude_row_attrs {
                    f.write_str(",excludeRowAttrs=true")?;
                }
                if !options.shards.is_empty() {
                    f.write_str(",shards=")?;
                    write_numbers(f, &options.shards)?;
                }
                f.write_str(")")
            }
            Self::SetRowAttrs { field, row, attrs } => {
                write!(f, "SetRowAttrs({field},{row},")?;
                write_attrs(f, attrs)?;
                f.write_str(")")
            }
            Self::SetColumnAttrs { column, attrs } => {
                write!(f, "SetColumnAttrs({column},")?;
                write_attrs(f, attrs)?;
                f.write_str(")")
            }
            Self::Raw(text) => f.write_str(text),
        }
    }
}

/// Anything the client can execute.
pub trait Query {
    /// Index the query runs against.
    fn index(&self) -> &IndexRef;

    /// Query text sent to the server.
    fn serialize(&self) -> String;

    /// Result kind of each top-level call, in submission order.
    fn result_kinds(&self) -> Vec<ResultKind>;
}

/// A single call bound to its index.
#[derive(Debug, Clone, PartialEq)]
pub struct PqlQuery {
    index: IndexRef,
    call: Call,
}

impl PqlQuery {
    /// The call tree.
    pub fn call(&self) -> &Call {
        &self.call
    }

    /// Unwrap the call tree.
    pub fn into_call(self) -> Call {
        self.call
    }
}

impl Query for PqlQuery {
    fn index(&self) -> &IndexRef {
        &self.index
    }

    fn serialize(&self) -> String {
        self.call.to_string()
    }

    fn result_kinds(&self) -> Vec<ResultKind> {
        vec![self.call.result_kind()]
    }
}

/// Several calls sent in one request; results come back in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct PqlBatchQuery {
    index: IndexRef,
    calls: Vec<Call>,
}

impl PqlBatchQuery {
    /// Append a query. It must target the batch's index.
    pub fn add(&mut self, query: PqlQuery) -> Result<()> {
        check_same_index(&self.index, &query.index)?;
        self.calls.push(query.call);
        Ok(())
    }

    pub(crate) fn with_calls(index: IndexRef, calls: Vec<Call>) -> Self {
        Self { index, calls }
    }

    /// Calls in submission order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Number of calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// True when the batch holds no call.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Query for PqlBatchQuery {
    fn index(&self) -> &IndexRef {
        &self.index
    }

    fn serialize(&self) -> String {
        self.calls.iter().map(ToString::to_string).collect()
    }

    fn result_kinds(&self) -> Vec<ResultKind> {
        self.calls.iter().map(Call::result_kind).collect()
    }
}

fn check_same_index(expected: &IndexRef, found: &IndexRef) -> Result<()> {
    if expected.name() == found.name() {
        Ok(())
    } else {
        Err(PilosaError::IndexMismatch {
            expected: expected.name().to_owned(),
            found: found.name().to_owned(),
        })
    }
}

fn check_id_key(target: &str, keyed: bool, value: IdKey) -> Result<IdKey> {
    match (&value, keyed) {
        (IdKey::Key(key), true) => {
            validate_key(key)?;
            Ok(value)
        }
        (IdKey::Id(_), false) => Ok(value),
        (_, keyed) => Err(PilosaError::KeyIdMismatch {
            target: target.to_owned(),
            expected: if keyed { "key" } else { "id" },
            value: value.to_string(),
        }),
    }
}

pub(crate) fn row_arg(field: &Field, row: IdKey) -> Result<IdKey> {
    check_id_key(field.name(), field.options().keys(), row)
}

pub(crate) fn column_arg(index: &IndexRef, column: IdKey) -> Result<IdKey> {
    check_id_key(index.name(), index.options().keys, column)
}

/// Check that `query` is a row call on `index` and take its call.
fn row_call(call: &'static str, index: &IndexRef, position: usize, query: PqlQuery) -> Result<Call> {
    check_same_index(index, &query.index)?;
    if !query.call.is_row_call() {
        return Err(PilosaError::InvalidArgumentType {
            call,
            position,
            expected: "row",
            got: query.call.name().to_owned(),
        });
    }
    Ok(query.call)
}

fn row_calls(call: &'static str, index: &IndexRef, queries: Vec<PqlQuery>) -> Result<Vec<Call>> {
    queries
        .into_iter()
        .enumerate()
        .map(|(position, q)| row_call(call, index, position, q))
        .collect()
}

fn attr_map<I, K, V>(attrs: I) -> Result<BTreeMap<String, AttrValue>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<AttrValue>,
{
    attrs
        .into_iter()
        .map(|(k, v)| {
            let label = k.into();
            validate_label(&label)?;
            Ok((label, v.into()))
        })
        .collect()
}

impl Index {
    fn bind(&self, call: Call) -> PqlQuery {
        PqlQuery {
            index: self.handle(),
            call,
        }
    }

    fn set_op(&self, name: &'static str, min: usize, rows: Vec<PqlQuery>) -> Result<Vec<Call>> {
        if rows.len() < min {
            return Err(PilosaError::InvalidArgumentCount {
                call: name,
                expected: "at least 1",
                got: rows.len(),
            });
        }
        row_calls(name, &self.handle(), rows)
    }

    /// Unvalidated query text. Errors in it surface only at the server.
    pub fn raw_query(&self, text: impl Into<String>) -> PqlQuery {
        self.bind(Call::Raw(text.into()))
    }

    /// Batch of queries on this index.
    pub fn batch_query(&self, queries: impl IntoIterator<Item = PqlQuery>) -> Result<PqlBatchQuery> {
        let mut batch = PqlBatchQuery {
            index: self.handle(),
            calls: Vec::new(),
        };
        for query in queries {
            batch.add(query)?;
        }
        Ok(batch)
    }

    /// `Union` of zero or more rows.
    pub fn union(&self, rows: impl IntoIterator<Item = PqlQuery>) -> Result<PqlQuery> {
        Ok(self.bind(Call::Union(self.set_op("Union", 0, rows.into_iter().collect())?)))
    }

    /// `Intersect` of one or more rows.
    pub fn intersect(&self, rows: impl IntoIterator<Item = PqlQuery>) -> Result<PqlQuery> {
        Ok(self.bind(Call::Intersect(self.set_op("Intersect", 1, rows.into_iter().collect())?)))
    }

    /// `Difference`: the first row minus every following one.
    pub fn difference(&self, rows: impl IntoIterator<Item = PqlQuery>) -> Result<PqlQuery> {
        Ok(self.bind(Call::Difference(self.set_op("Difference", 1, rows.into_iter().collect())?)))
    }

    /// `Xor` of zero or more rows.
    pub fn xor(&self, rows: impl IntoIterator<Item = PqlQuery>) -> Result<PqlQuery> {
        Ok(self.bind(Call::Xor(self.set_op("Xor", 0, rows.into_iter().collect())?)))
    }

    /// Columns not in `row`. The index must track existence.
    pub fn not_(&self, row: PqlQuery) -> Result<PqlQuery> {
        if !self.track_existence() {
            return Err(PilosaError::ExistenceNotTracked {
                index: self.name().to_owned(),
            });
        }
        let call = row_call("Not", &self.handle(), 0, row)?;
        Ok(self.bind(Call::Not(Box::new(call))))
    }

    /// Number of columns in `row`.
    pub fn count(&self, row: PqlQuery) -> Result<PqlQuery> {
        let call = row_call("Count", &self.handle(), 0, row)?;
        Ok(self.bind(Call::Count(Box::new(call))))
    }

    /// Count column intersections across the rows of several fields.
    ///
    /// Every argument must be a `Rows` call.
    pub fn group_by(
        &self,
        rows: impl IntoIterator<Item = PqlQuery>,
        limit: Option<u64>,
        filter: Option<PqlQuery>,
    ) -> Result<PqlQuery> {
        let handle = self.handle();
        let mut calls = Vec::new();
        for (position, query) in rows.into_iter().enumerate() {
            check_same_index(&handle, &query.index)?;
            if !matches!(query.call, Call::Rows { .. }) {
                return Err(PilosaError::InvalidArgumentType {
                    call: "GroupBy",
                    position,
                    expected: "Rows",
                    got: query.call.name().to_owned(),
                });
            }
            calls.push(query.call);
        }
        if calls.is_empty() {
            return Err(PilosaError::InvalidArgumentCount {
                call: "GroupBy",
                expected: "at least 1",
                got: 0,
            });
        }
        let filter = filter
            .map(|q| row_call("GroupBy", &handle, calls.len(), q).map(Box::new))
            .transpose()?;
        Ok(self.bind(Call::GroupBy {
            rows: calls,
            limit,
            filter,
        }))
    }

    /// Wrap `query` in server-side options.
    pub fn with_options(&self, query: PqlQuery, options: CallOptions) -> Result<PqlQuery> {
        check_same_index(&self.handle(), &query.index)?;
        Ok(self.bind(Call::Options {
            call: Box::new(query.call),
            options,
        }))
    }

    /// Attach attributes to a column.
    pub fn set_column_attrs<I, K, V>(&self, column: impl Into<IdKey>, attrs: I) -> Result<PqlQuery>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let column = column_arg(&self.handle(), column.into())?;
        Ok(self.bind(Call::SetColumnAttrs {
            column,
            attrs: attr_map(attrs)?,
        }))
    }
}

impl Field {
    fn bind(&self, call: Call) -> PqlQuery {
        PqlQuery {
            index: self.index().clone(),
            call,
        }
    }

    fn filter(&self, call: &'static str, filter: Option<PqlQuery>) -> Result<Option<Box<Call>>> {
        filter
            .map(|q| row_call(call, self.index(), 0, q).map(Box::new))
            .transpose()
    }

    /// Columns set in `row`.
    pub fn row(&self, row: impl Into<IdKey>) -> Result<PqlQuery> {
        let row = row_arg(self, row.into())?;
        Ok(self.bind(Call::Row {
            field: self.name().to_owned(),
            row,
        }))
    }

    /// Set the bit at (`row`, `column`).
    pub fn set(&self, row: impl Into<IdKey>, column: impl Into<IdKey>) -> Result<PqlQuery> {
        self.set_with(row.into(), column.into(), None)
    }

    /// Set the bit at (`row`, `column`) at `timestamp` (epoch seconds).
    ///
    /// The timestamp is truncated to the field's finest time unit. Fields
    /// without a time quantum reject it.
    pub fn set_at(&self, row: impl Into<IdKey>, column: impl Into<IdKey>, timestamp: i64) -> Result<PqlQuery> {
        self.set_with(row.into(), column.into(), Some(timestamp))
    }

    pub(crate) fn set_with(&self, row: IdKey, column: IdKey, timestamp: Option<i64>) -> Result<PqlQuery> {
        let row = row_arg(self, row)?;
        let column = column_arg(self.index(), column)?;
        let timestamp = timestamp.map(|ts| self.quantize(ts)).transpose()?;
        Ok(self.bind(Call::Set {
            field: self.name().to_owned(),
            row,
            column,
            timestamp,
        }))
    }

    /// Truncate `timestamp` to this field's finest time unit.
    pub fn quantize(&self, timestamp: i64) -> Result<i64> {
        match self.options().time_quantum().finest() {
            Some(unit) => quantize(timestamp, unit),
            None => Err(PilosaError::TimestampNotSupported {
                field: self.name().to_owned(),
                timestamp,
            }),
        }
    }

    /// Clear the bit at (`row`, `column`).
    pub fn clear(&self, row: impl Into<IdKey>, column: impl Into<IdKey>) -> Result<PqlQuery> {
        let row = row_arg(self, row.into())?;
        let column = column_arg(self.index(), column.into())?;
        Ok(self.bind(Call::Clear {
            field: self.name().to_owned(),
            row,
            column,
        }))
    }

    /// Clear every bit of `row`.
    pub fn clear_row(&self, row: impl Into<IdKey>) -> Result<PqlQuery> {
        let row = row_arg(self, row.into())?;
        Ok(self.bind(Call::ClearRow {
            field: self.name().to_owned(),
            row,
        }))
    }

    /// Write the columns of `source` into `row` of this field.
    pub fn store(&self, source: PqlQuery, row: impl Into<IdKey>) -> Result<PqlQuery> {
        let source = row_call("Store", self.index(), 0, source)?;
        let row = row_arg(self, row.into())?;
        Ok(self.bind(Call::Store {
            source: Box::new(source),
            field: self.name().to_owned(),
            row,
        }))
    }

    /// The `n` rows with the most columns, optionally within `filter`.
    pub fn topn(&self, n: u64, filter: Option<PqlQuery>) -> Result<PqlQuery> {
        Ok(self.bind(Call::TopN {
            field: self.name().to_owned(),
            n,
            filter: self.filter("TopN", filter)?,
            attr_filter: None,
        }))
    }

    /// Like [`Field::topn`], keeping only rows whose attribute `attr` has one
    /// of `values`.
    pub fn topn_attr(
        &self,
        n: u64,
        filter: Option<PqlQuery>,
        attr: &str,
        values: impl IntoIterator<Item = AttrValue>,
    ) -> Result<PqlQuery> {
        validate_label(attr)?;
        Ok(self.bind(Call::TopN {
            field: self.name().to_owned(),
            n,
            filter: self.filter("TopN", filter)?,
            attr_filter: Some((attr.to_owned(), values.into_iter().collect())),
        }))
    }

    /// Columns of `row` set between `start` and `end` (epoch seconds).
    ///
    /// Only time fields keep the views this call reads, and both bounds must
    /// be expressible in query time text.
    pub fn range(&self, row: impl Into<IdKey>, start: i64, end: i64) -> Result<PqlQuery> {
        if self.options().time_quantum().is_none() {
            return Err(PilosaError::InvalidFieldOptions {
                field: self.name().to_owned(),
                reason: "time ranges need a field with a time quantum".to_owned(),
            });
        }
        format_query_time(start)?;
        format_query_time(end)?;
        if start > end {
            return Err(PilosaError::InvalidArgumentRange {
                call: "Range",
                detail: format!("start {start} is after end {end}"),
            });
        }
        let row = row_arg(self, row.into())?;
        Ok(self.bind(Call::TimeRange {
            field: self.name().to_owned(),
            row,
            start,
            end,
        }))
    }

    fn compare(&self, op: CompareOp, value: i64) -> PqlQuery {
        self.bind(Call::Compare {
            field: self.name().to_owned(),
            op,
            value,
        })
    }

    /// Columns whose value is `< n`.
    pub fn lt(&self, n: i64) -> PqlQuery {
        self.compare(CompareOp::Lt, n)
    }

    /// Columns whose value is `<= n`.
    pub fn lte(&self, n: i64) -> PqlQuery {
        self.compare(CompareOp::Lte, n)
    }

    /// Columns whose value is `> n`.
    pub fn gt(&self, n: i64) -> PqlQuery {
        self.compare(CompareOp::Gt, n)
    }

    /// Columns whose value is `>= n`.
    pub fn gte(&self, n: i64) -> PqlQuery {
        self.compare(CompareOp::Gte, n)
    }

    /// Columns whose value is `n`.
    pub fn equals(&self, n: i64) -> PqlQuery {
        self.compare(CompareOp::Eq, n)
    }

    /// Columns whose value is not `n`.
    pub fn not_equals(&self, n: i64) -> PqlQuery {
        self.compare(CompareOp::Neq, n)
    }

    /// Columns with any value.
    pub fn not_null(&self) -> PqlQuery {
        self.bind(Call::NotNull {
            field: self.name().to_owned(),
        })
    }

    /// Columns whose value lies in `low..=high`.
    pub fn between(&self, low: i64, high: i64) -> Result<PqlQuery> {
        if low > high {
            return Err(PilosaError::InvalidArgumentRange {
                call: "Range",
                detail: format!("[{low},{high}]"),
            });
        }
        Ok(self.bind(Call::Between {
            field: self.name().to_owned(),
            low,
            high,
        }))
    }

    fn aggregate(&self, op: Aggregate, filter: Option<PqlQuery>) -> Result<PqlQuery> {
        let filter = self.filter(op.as_str(), filter)?;
        Ok(self.bind(Call::Aggregate {
            op,
            field: self.name().to_owned(),
            filter,
        }))
    }

    /// Sum of values, optionally within `filter`.
    pub fn sum(&self, filter: Option<PqlQuery>) -> Result<PqlQuery> {
        self.aggregate(Aggregate::Sum, filter)
    }

    /// Smallest value, optionally within `filter`.
    pub fn min(&self, filter: Option<PqlQuery>) -> Result<PqlQuery> {
        self.aggregate(Aggregate::Min, filter)
    }

    /// Largest value, optionally within `filter`.
    pub fn max(&self, filter: Option<PqlQuery>) -> Result<PqlQuery> {
        self.aggregate(Aggregate::Max, filter)
    }

    /// Store `value` for `column` in an int field.
    pub fn setvalue(&self, column: impl Into<IdKey>, value: i64) -> Result<PqlQuery> {
        if self.options().field_type() != FieldType::Int {
            return Err(PilosaError::InvalidFieldOptions {
                field: self.name().to_owned(),
                reason: format!("values need an int field, not {}", self.options().field_type()),
            });
        }
        let column = column_arg(self.index(), column.into())?;
        Ok(self.bind(Call::SetValue {
            field: self.name().to_owned(),
            column,
            value,
        }))
    }

    /// Row identifiers of this field.
    pub fn rows(&self, options: RowsOptions) -> Result<PqlQuery> {
        let previous = options.previous.map(|p| row_arg(self, p)).transpose()?;
        let column = options.column.map(|c| column_arg(self.index(), c)).transpose()?;
        Ok(self.bind(Call::Rows {
            field: self.name().to_owned(),
            options: RowsOptions {
                previous,
                limit: options.limit,
                column,
            },
        }))
    }

    /// Attach attributes to a row.
    pub fn set_row_attrs<I, K, V>(&self, row: impl Into<IdKey>, attrs: I) -> Result<PqlQuery>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let row = row_arg(self, row.into())?;
        Ok(self.bind(Call::SetRowAttrs {
            field: self.name().to_owned(),
            row,
            attrs: attr_map(attrs)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::schema::{FieldOptions, IndexOptions, Schema, TimeQuantum};

    struct Fixture {
        index: Index,
        other: Index,
        keyed: Index,
        sample: Field,
        collab: Field,
        stars: Field,
        seen: Field,
        tags: Field,
    }

    fn fixture() -> Fixture {
        let mut schema = Schema::new();
        let index = schema
            .index("sample-db", IndexOptions { keys: false, track_existence: true })
            .unwrap();
        let sample = index.field("sample-field", FieldOptions::set()).unwrap();
        let collab = index.field("collaboration", FieldOptions::set()).unwrap();
        let stars = index.field("stars", FieldOptions::int(0, 1000)).unwrap();
        let seen = index.field("seen", FieldOptions::time(TimeQuantum::YMDH)).unwrap();
        let index = index.clone();
        let keyed = schema.index("keyed", IndexOptions { keys: true, track_existence: false }).unwrap();
        let tags = keyed.field("tags", FieldOptions::set().with_keys(true)).unwrap();
        let keyed = keyed.clone();
        let other = schema.index("other-db", IndexOptions::default()).unwrap().clone();
        Fixture { index, other, keyed, sample, collab, stars, seen, tags }
    }

    #[test]
    fn row_and_mutations() {
        let f = fixture();
        assert_eq!(f.sample.row(5).unwrap().serialize(), "Row(sample-field=5)");
        assert_eq!(f.tags.row("go").unwrap().serialize(), "Row(tags='go')");
        assert_eq!(f.sample.set(5, 10).unwrap().serialize(), "Set(10,sample-field=5)");
        assert_eq!(f.tags.set("go", "repo1").unwrap().serialize(), "Set('repo1',tags='go')");
        assert_eq!(f.sample.clear(5, 10).unwrap().serialize(), "Clear(10,sample-field=5)");
        assert_eq!(f.sample.clear_row(5).unwrap().serialize(), "ClearRow(sample-field=5)");
        assert_eq!(f.stars.setvalue(10, 42).unwrap().serialize(), "Set(10,stars=42)");
        let stored = f.collab.store(f.sample.row(1).unwrap(), 5).unwrap();
        assert_eq!(stored.serialize(), "Store(Row(sample-field=1),collaboration=5)");
        assert_eq!(stored.result_kinds(), vec![ResultKind::Changed]);
    }

    #[test]
    fn set_with_timestamp_quantizes_to_field_unit() {
        let f = fixture();
        let q = f.seen.set_at(1, 10, 683_793_200).unwrap();
        assert_eq!(q.serialize(), "Set(10,seen=1,1991-09-02T06:00)");
        assert!(matches!(
            f.sample.set_at(1, 10, 683_793_200),
            Err(PilosaError::TimestampNotSupported { timestamp: 683_793_200, .. })
        ));
    }

    #[test]
    fn set_algebra_arity() {
        let f = fixture();
        assert_eq!(f.index.union(Vec::new()).unwrap().serialize(), "Union()");
        assert_eq!(f.index.xor(Vec::new()).unwrap().serialize(), "Xor()");
        assert!(matches!(
            f.index.intersect(Vec::new()),
            Err(PilosaError::InvalidArgumentCount { call: "Intersect", got: 0, .. })
        ));
        assert!(matches!(
            f.index.difference(Vec::new()),
            Err(PilosaError::InvalidArgumentCount { call: "Difference", .. })
        ));
        let rows = || vec![f.sample.row(10).unwrap(), f.sample.row(20).unwrap()];
        assert_eq!(
            f.index.union(rows()).unwrap().serialize(),
            "Union(Row(sample-field=10),Row(sample-field=20))"
        );
        assert_eq!(
            f.index.intersect(rows()).unwrap().serialize(),
            "Intersect(Row(sample-field=10),Row(sample-field=20))"
        );
        assert_eq!(
            f.index.difference(rows()).unwrap().serialize(),
            "Difference(Row(sample-field=10),Row(sample-field=20))"
        );
        assert_eq!(f.index.xor(rows()).unwrap().serialize(), "Xor(Row(sample-field=10),Row(sample-field=20))");
    }

    #[test]
    fn nested_arguments_must_be_rows_of_the_same_index() {
        let f = fixture();
        let count = f.index.count(f.sample.row(1).unwrap()).unwrap();
        assert!(matches!(
            f.index.union(vec![count]),
            Err(PilosaError::InvalidArgumentType { call: "Union", position: 0, expected: "row", .. })
        ));
        assert!(matches!(
            f.other.union(vec![f.sample.row(1).unwrap()]),
            Err(PilosaError::IndexMismatch { .. })
        ));
        let raw = f.index.raw_query("Row(sample-field=1)");
        assert_eq!(f.index.union(vec![raw]).unwrap().serialize(), "Union(Row(sample-field=1))");
    }

    #[test]
    fn ids_and_keys_follow_the_schema() {
        let f = fixture();
        assert!(matches!(
            f.sample.row("one"),
            Err(PilosaError::KeyIdMismatch { expected: "id", .. })
        ));
        assert!(matches!(f.tags.row(1), Err(PilosaError::KeyIdMismatch { expected: "key", .. })));
        assert!(matches!(f.tags.set("go", 10), Err(PilosaError::KeyIdMismatch { .. })));
        assert!(matches!(f.sample.set(1, "col"), Err(PilosaError::KeyIdMismatch { .. })));
        assert!(matches!(f.tags.row("has space"), Err(PilosaError::InvalidIdentifier { kind: "key", .. })));
    }

    #[test]
    fn not_needs_existence_tracking() {
        let f = fixture();
        assert_eq!(
            f.index.not_(f.sample.row(1).unwrap()).unwrap().serialize(),
            "Not(Row(sample-field=1))"
        );
        assert!(matches!(
            f.keyed.not_(f.tags.row("go").unwrap()),
            Err(PilosaError::ExistenceNotTracked { .. })
        ));
    }

    #[test]
    fn topn_forms() {
        let f = fixture();
        assert_eq!(f.sample.topn(27, None).unwrap().serialize(), "TopN(sample-field,n=27)");
        assert_eq!(
            f.sample.topn(10, Some(f.collab.row(3).unwrap())).unwrap().serialize(),
            "TopN(sample-field,Row(collaboration=3),n=10)"
        );
        let q = f
            .sample
            .topn_attr(12, Some(f.collab.row(7).unwrap()), "category", vec![AttrValue::Int(80), AttrValue::Int(81)])
            .unwrap();
        assert_eq!(q.serialize(), "TopN(sample-field,Row(collaboration=7),n=12,field='category',filters=[80,81])");
        assert_eq!(q.result_kinds(), vec![ResultKind::Pairs]);
    }

    #[test]
    fn range_and_bsi_forms() {
        let f = fixture();
        // 1970-01-01T00:00 .. 2000-02-02T03:04
        assert_eq!(
            f.seen.range(10, 0, 949_460_640).unwrap().serialize(),
            "Range(seen=10,1970-01-01T00:00,2000-02-02T03:04)"
        );
        assert!(matches!(f.seen.range(10, 5, 1), Err(PilosaError::InvalidArgumentRange { .. })));
        assert!(matches!(
            f.seen.range(1, 0, 300_000_000_000),
            Err(PilosaError::InvalidArgumentRange { call: "timestamp", .. })
        ));
        assert!(matches!(
            f.seen.range(1, i64::MIN, 0),
            Err(PilosaError::InvalidArgumentRange { call: "timestamp", .. })
        ));
        assert!(matches!(f.sample.range(1, 0, 10), Err(PilosaError::InvalidFieldOptions { .. })));
        assert!(matches!(f.stars.range(1, 0, 10), Err(PilosaError::InvalidFieldOptions { .. })));
        assert_eq!(f.stars.lt(10).serialize(), "Range(stars < 10)");
        assert_eq!(f.stars.lte(10).serialize(), "Range(stars <= 10)");
        assert_eq!(f.stars.gt(10).serialize(), "Range(stars > 10)");
        assert_eq!(f.stars.gte(10).serialize(), "Range(stars >= 10)");
        assert_eq!(f.stars.equals(10).serialize(), "Range(stars == 10)");
        assert_eq!(f.stars.not_equals(10).serialize(), "Range(stars != 10)");
        assert_eq!(f.stars.not_null().serialize(), "Range(stars != null)");
        assert_eq!(f.stars.between(10, 20).unwrap().serialize(), "Range(stars >< [10,20])");
        assert!(matches!(f.stars.between(20, 10), Err(PilosaError::InvalidArgumentRange { .. })));
    }

    #[test]
    fn aggregates() {
        let f = fixture();
        assert_eq!(f.stars.sum(None).unwrap().serialize(), "Sum(field='stars')");
        assert_eq!(
            f.stars.min(Some(f.sample.row(1).unwrap())).unwrap().serialize(),
            "Min(Row(sample-field=1),field='stars')"
        );
        let max = f.stars.max(None).unwrap();
        assert_eq!(max.serialize(), "Max(field='stars')");
        assert_eq!(max.result_kinds(), vec![ResultKind::Value]);
        assert!(matches!(f.sample.setvalue(1, 2), Err(PilosaError::InvalidFieldOptions { .. })));
    }

    #[test]
    fn rows_and_group_by() {
        let f = fixture();
        let rows = f
            .sample
            .rows(RowsOptions { previous: Some(IdKey::Id(10)), limit: Some(5), column: Some(IdKey::Id(3)) })
            .unwrap();
        assert_eq!(rows.serialize(), "Rows(field='sample-field',previous=10,limit=5,column=3)");
        let grouped = f
            .index
            .group_by(
                vec![f.sample.rows(RowsOptions::default()).unwrap(), f.collab.rows(RowsOptions::default()).unwrap()],
                Some(10),
                Some(f.sample.row(1).unwrap()),
            )
            .unwrap();
        assert_eq!(
            grouped.serialize(),
            "GroupBy(Rows(field='sample-field'),Rows(field='collaboration'),limit=10,filter=Row(sample-field=1))"
        );
        assert_eq!(grouped.result_kinds(), vec![ResultKind::GroupCounts]);
        assert!(matches!(
            f.index.group_by(Vec::new(), None, None),
            Err(PilosaError::InvalidArgumentCount { call: "GroupBy", .. })
        ));
        assert!(matches!(
            f.index.group_by(vec![f.sample.row(1).unwrap()], None, None),
            Err(PilosaError::InvalidArgumentType { expected: "Rows", .. })
        ));
    }

    #[test]
    fn options_wrap_a_call() {
        let f = fixture();
        let q = f
            .index
            .with_options(
                f.sample.row(1).unwrap(),
                CallOptions { column_attrs: true, exclude_columns: true, exclude_row_attrs: true, shards: vec![1, 3] },
            )
            .unwrap();
        assert_eq!(
            q.serialize(),
            "Options(Row(sample-field=1),columnAttrs=true,excludeColumns=true,excludeRowAttrs=true,shards=[1,3])"
        );
        assert_eq!(q.result_kinds(), vec![ResultKind::Row]);
    }

    #[test]
    fn attribute_setters_sort_and_validate_labels() {
        let f = fixture();
        let q = f
            .sample
            .set_row_attrs(5, vec![("quote", AttrValue::from("\"Don't worry, be happy\"")), ("active", AttrValue::from(true))])
            .unwrap();
        assert_eq!(q.serialize(), r#"SetRowAttrs(sample-field,5,active=true,quote="\"Don't worry, be happy\"")"#);
        let q = f.index.set_column_attrs(5, vec![("happy", true)]).unwrap();
        assert_eq!(q.serialize(), "SetColumnAttrs(5,happy=true)");
        assert_eq!(q.result_kinds(), vec![ResultKind::Null]);
        assert!(matches!(
            f.index.set_column_attrs(5, vec![("1bad", true)]),
            Err(PilosaError::InvalidIdentifier { kind: "label", .. })
        ));
    }

    #[test]
    fn batch_concatenates_in_order() {
        let f = fixture();
        let batch = f
            .index
            .batch_query(vec![
                f.index.count(f.sample.row(1).unwrap()).unwrap(),
                f.sample.row(2).unwrap(),
                f.index.raw_query("Row(collaboration=3)"),
            ])
            .unwrap();
        assert_eq!(batch.serialize(), "Count(Row(sample-field=1))Row(sample-field=2)Row(collaboration=3)");
        assert_eq!(batch.result_kinds(), vec![ResultKind::Count, ResultKind::Row, ResultKind::Unknown]);
        let mut batch = f.other.batch_query(Vec::new()).unwrap();
        assert!(matches!(batch.add(f.sample.row(1).unwrap()), Err(PilosaError::IndexMismatch { .. })));
        assert!(batch.is_empty());
    }
}
