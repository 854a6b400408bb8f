// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema model and reconciliation.
//!
//! A [`Schema`] owns its [`Index`]es, an index owns its [`Field`]s. A field
//! refers back to its index through an [`IndexRef`] (name plus options),
//! never through a pointer, so the ownership graph stays a tree.
//!
//! [`diff`] compares a local schema with a server snapshot and yields the
//! creation operations needed to bring the server up to date. It never emits
//! deletions and never overwrites a differing remote definition; those cases
//! fail with [`PilosaError::SchemaConflict`].
//!
//! A schema must not be mutated from two threads at once; callers own that
//! obligation.

use pilosa_proto::{FieldMeta, IndexMeta, SchemaDocument};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PilosaError, Result};
use crate::validator::{validate_field_name, validate_index_name};

/// Field maintained by the server itself; never synced or listed.
pub const RESERVED_FIELD: &str = "exists";

/// Shard width used when the server does not report one.
pub const DEFAULT_SHARD_WIDTH: u64 = 1 << 20;

/// One calendar unit of a [`TimeQuantum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    /// Calendar year.
    Year,
    /// Calendar month.
    Month,
    /// Calendar day.
    Day,
    /// Hour of day.
    Hour,
}

/// Granularity of the time views a time field maintains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TimeQuantum {
    /// No time views.
    #[default]
    None,
    /// Year.
    Y,
    /// Month.
    M,
    /// Day.
    D,
    /// Hour.
    H,
    /// Year and month.
    YM,
    /// Month and day.
    MD,
    /// Day and hour.
    DH,
    /// Year, month, day.
    YMD,
    /// Month, day, hour.
    MDH,
    /// Year, month, day, hour.
    YMDH,
}

impl TimeQuantum {
    /// Wire name; empty for [`TimeQuantum::None`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Y => "Y",
            Self::M => "M",
            Self::D => "D",
            Self::H => "H",
            Self::YM => "YM",
            Self::MD => "MD",
            Self::DH => "DH",
            Self::YMD => "YMD",
            Self::MDH => "MDH",
            Self::YMDH => "YMDH",
        }
    }

    /// Parse a wire name. The empty string is [`TimeQuantum::None`].
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "" => Self::None,
            "Y" => Self::Y,
            "M" => Self::M,
            "D" => Self::D,
            "H" => Self::H,
            "YM" => Self::YM,
            "MD" => Self::MD,
            "DH" => Self::DH,
            "YMD" => Self::YMD,
            "MDH" => Self::MDH,
            "YMDH" => Self::YMDH,
            _ => return None,
        })
    }

    /// Units in coarse-to-fine order.
    pub fn units(self) -> &'static [TimeUnit] {
        use TimeUnit::{Day, Hour, Month, Year};
        match self {
            Self::None => &[],
            Self::Y => &[Year],
            Self::M => &[Month],
            Self::D => &[Day],
            Self::H => &[Hour],
            Self::YM => &[Year, Month],
            Self::MD => &[Month, Day],
            Self::DH => &[Day, Hour],
            Self::YMD => &[Year, Month, Day],
            Self::MDH => &[Month, Day, Hour],
            Self::YMDH => &[Year, Month, Day, Hour],
        }
    }

    /// Finest unit; timestamps are truncated to it before transfer.
    pub fn finest(self) -> Option<TimeUnit> {
        self.units().last().copied()
    }

    /// True for [`TimeQuantum::None`].
    pub fn is_none(self) -> bool {
        self == Self::None
    }
}

impl fmt::Display for TimeQuantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row cache kept by the server for set and mutex fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CacheType {
    /// Server default; never sent.
    #[default]
    Default,
    /// Least recently used.
    Lru,
    /// Ranked by count; required for `TopN`.
    Ranked,
    /// No cache.
    None,
}

impl CacheType {
    /// Wire name; empty for [`CacheType::Default`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Lru => "lru",
            Self::Ranked => "ranked",
            Self::None => "none",
        }
    }

    /// Parse a wire name; unknown names map to the default.
    pub fn parse(s: &str) -> Self {
        match s {
            "lru" => Self::Lru,
            "ranked" => Self::Ranked,
            "none" => Self::None,
            _ => Self::Default,
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Plain bitmap rows.
    Set,
    /// Bit-sliced integer.
    Int,
    /// Bitmap rows with time views.
    Time,
    /// At most one row per column.
    Mutex,
    /// Two rows, true and false.
    Bool,
}

impl FieldType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Int => "int",
            Self::Time => "time",
            Self::Mutex => "mutex",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options of one field, one variant per field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOptions {
    /// Set field.
    Set {
        /// Rows are addressed by string keys.
        keys: bool,
        /// Row cache type.
        cache_type: CacheType,
        /// Row cache size; zero keeps the server default.
        cache_size: u32,
    },
    /// Integer field; `min <= max`.
    Int {
        /// Smallest storable value.
        min: i64,
        /// Largest storable value.
        max: i64,
    },
    /// Time field; the quantum is never `None`.
    Time {
        /// Rows are addressed by string keys.
        keys: bool,
        /// View granularity.
        quantum: TimeQuantum,
    },
    /// Mutex field.
    Mutex {
        /// Rows are addressed by string keys.
        keys: bool,
        /// Row cache type.
        cache_type: CacheType,
        /// Row cache size; zero keeps the server default.
        cache_size: u32,
    },
    /// Boolean field.
    Bool,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self::set()
    }
}

impl FieldOptions {
    /// Set field with default cache.
    pub fn set() -> Self {
        Self::Set {
            keys: false,
            cache_type: CacheType::Default,
            cache_size: 0,
        }
    }

    /// Integer field holding values in `min..=max`.
    pub fn int(min: i64, max: i64) -> Self {
        Self::Int { min, max }
    }

    /// Time field with the given quantum.
    pub fn time(quantum: TimeQuantum) -> Self {
        Self::Time {
            keys: false,
            quantum,
        }
    }

    /// Mutex field with default cache.
    pub fn mutex() -> Self {
        Self::Mutex {
            keys: false,
            cache_type: CacheType::Default,
            cache_size: 0,
        }
    }

    /// Boolean field.
    pub fn bool() -> Self {
        Self::Bool
    }

    /// Enable or disable row keys. No effect on int and bool fields.
    pub fn with_keys(mut self, enabled: bool) -> Self {
        match &mut self {
            Self::Set { keys, .. } | Self::Time { keys, .. } | Self::Mutex { keys, .. } => *keys = enabled,
            Self::Int { .. } | Self::Bool => {}
        }
        self
    }

    /// Set the row cache. No effect on fields without a cache.
    pub fn with_cache(mut self, cache: CacheType, size: u32) -> Self {
        match &mut self {
            Self::Set {
                cache_type,
                cache_size,
                ..
            }
            | Self::Mutex {
                cache_type,
                cache_size,
                ..
            } => {
                *cache_type = cache;
                *cache_size = size;
            }
            Self::Int { .. } | Self::Time { .. } | Self::Bool => {}
        }
        self
    }

    /// Type tag.
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Set { .. } => FieldType::Set,
            Self::Int { .. } => FieldType::Int,
            Self::Time { .. } => FieldType::Time,
            Self::Mutex { .. } => FieldType::Mutex,
            Self::Bool => FieldType::Bool,
        }
    }

    /// Whether rows are addressed by keys.
    pub fn keys(&self) -> bool {
        match self {
            Self::Set { keys, .. } | Self::Time { keys, .. } | Self::Mutex { keys, .. } => *keys,
            Self::Int { .. } | Self::Bool => false,
        }
    }

    /// Time quantum; `None` for non-time fields.
    pub fn time_quantum(&self) -> TimeQuantum {
        match self {
            Self::Time { quantum, .. } => *quantum,
            _ => TimeQuantum::None,
        }
    }

    fn validate(&self, field: &str) -> Result<()> {
        let invalid = |reason: String| PilosaError::InvalidFieldOptions {
            field: field.to_owned(),
            reason,
        };
        match self {
            Self::Int { min, max } if min > max => Err(invalid(format!("min {min} is greater than max {max}"))),
            Self::Time { quantum, .. } if quantum.is_none() => {
                Err(invalid("time fields need a time quantum".to_owned()))
            }
            _ => Ok(()),
        }
    }

    /// Options as sent to the server; unset members are left out.
    pub fn to_meta(&self) -> FieldMeta {
        let mut meta = FieldMeta {
            field_type: Some(self.field_type().as_str().to_owned()),
            keys: self.keys().then_some(true),
            ..FieldMeta::default()
        };
        match self {
            Self::Set {
                cache_type,
                cache_size,
                ..
            }
            | Self::Mutex {
                cache_type,
                cache_size,
                ..
            } => {
                if *cache_type != CacheType::Default {
                    meta.cache_type = Some(cache_type.as_str().to_owned());
                }
                if *cache_size > 0 {
                    meta.cache_size = Some(*cache_size);
                }
            }
            Self::Int { min, max } => {
                meta.min = Some(*min);
                meta.max = Some(*max);
            }
            Self::Time { quantum, .. } => meta.time_quantum = Some(quantum.as_str().to_owned()),
            Self::Bool => {}
        }
        meta
    }

    /// Read options reported by the server.
    ///
    /// Older servers omit `type`; it is then inferred from the other members.
    pub fn from_meta(field: &str, meta: &FieldMeta) -> Result<Self> {
        let quantum_name = meta.time_quantum.as_deref().unwrap_or("");
        let quantum = TimeQuantum::parse(quantum_name).ok_or_else(|| PilosaError::InvalidFieldOptions {
            field: field.to_owned(),
            reason: format!("unknown time quantum {quantum_name:?}"),
        })?;
        let field_type = match meta.field_type.as_deref() {
            Some("set") => FieldType::Set,
            Some("int") => FieldType::Int,
            Some("time") => FieldType::Time,
            Some("mutex") => FieldType::Mutex,
            Some("bool") => FieldType::Bool,
            Some(other) => {
                return Err(PilosaError::InvalidFieldOptions {
                    field: field.to_owned(),
                    reason: format!("unknown field type {other:?}"),
                })
            }
            None if !quantum.is_none() => FieldType::Time,
            None if meta.min.is_some() || meta.max.is_some() => FieldType::Int,
            None => FieldType::Set,
        };
        let keys = meta.keys.unwrap_or(false);
        let cache_type = CacheType::parse(meta.cache_type.as_deref().unwrap_or(""));
        let cache_size = meta.cache_size.unwrap_or(0);
        let options = match field_type {
            FieldType::Set => Self::Set {
                keys,
                cache_type,
                cache_size,
            },
            FieldType::Int => Self::Int {
                min: meta.min.unwrap_or(0),
                max: meta.max.unwrap_or(0),
            },
            FieldType::Time => Self::Time { keys, quantum },
            FieldType::Mutex => Self::Mutex {
                keys,
                cache_type,
                cache_size,
            },
            FieldType::Bool => Self::Bool,
        };
        options.validate(field)?;
        Ok(options)
    }

    /// First option that differs from `remote`, as `(option, local, remote)`.
    ///
    /// Cache settings count only when set locally; the server always reports
    /// concrete values for them.
    fn conflict_with(&self, remote: &Self) -> Option<(&'static str, String, String)> {
        if self.field_type() != remote.field_type() {
            return Some(("type", self.field_type().to_string(), remote.field_type().to_string()));
        }
        if self.keys() != remote.keys() {
            return Some(("keys", self.keys().to_string(), remote.keys().to_string()));
        }
        match (self, remote) {
            (Self::Int { min, max }, Self::Int { min: rmin, max: rmax }) => {
                if min != rmin {
                    return Some(("min", min.to_string(), rmin.to_string()));
                }
                if max != rmax {
                    return Some(("max", max.to_string(), rmax.to_string()));
                }
            }
            (Self::Time { quantum, .. }, Self::Time { quantum: remote_quantum, .. }) if quantum != remote_quantum => {
                return Some(("timeQuantum", quantum.to_string(), remote_quantum.to_string()));
            }
            (
                Self::Set {
                    cache_type,
                    cache_size,
                    ..
                }
                | Self::Mutex {
                    cache_type,
                    cache_size,
                    ..
                },
                Self::Set {
                    cache_type: remote_type,
                    cache_size: remote_size,
                    ..
                }
                | Self::Mutex {
                    cache_type: remote_type,
                    cache_size: remote_size,
                    ..
                },
            ) => {
                if *cache_type != CacheType::Default && cache_type != remote_type {
                    return Some(("cacheType", cache_type.to_string(), remote_type.to_string()));
                }
                if *cache_size > 0 && cache_size != remote_size {
                    return Some(("cacheSize", cache_size.to_string(), remote_size.to_string()));
                }
            }
            _ => {}
        }
        None
    }
}

/// Options of an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IndexOptions {
    /// Columns are addressed by string keys.
    pub keys: bool,
    /// The server tracks which columns exist; required by `Not`.
    pub track_existence: bool,
}

impl IndexOptions {
    pub(crate) fn to_meta(self) -> IndexMeta {
        IndexMeta {
            keys: self.keys,
            track_existence: self.track_existence,
        }
    }
}

/// Non-owning reference from a field to its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexRef {
    name: String,
    options: IndexOptions,
}

impl IndexRef {
    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index options.
    pub fn options(&self) -> IndexOptions {
        self.options
    }
}

/// A field of an index.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    index: IndexRef,
    options: FieldOptions,
    on_server: bool,
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.index == other.index && self.options == other.options
    }
}

impl Eq for Field {}

impl Field {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning index.
    pub fn index(&self) -> &IndexRef {
        &self.index
    }

    /// Name of the owning index.
    pub fn index_name(&self) -> &str {
        &self.index.name
    }

    /// Field options.
    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    /// Whether the field is known to exist on the server.
    pub fn on_server(&self) -> bool {
        self.on_server
    }

    /// Options as a creation request body.
    pub fn meta(&self) -> FieldMeta {
        self.options.to_meta()
    }
}

/// An index and its fields.
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    options: IndexOptions,
    fields: BTreeMap<String, Field>,
    shard_width: u64,
    on_server: bool,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.options == other.options && self.fields == other.fields
    }
}

impl Eq for Index {}

impl Index {
    /// Standalone index. Most callers go through [`Schema::index`] instead.
    pub fn new(name: &str, options: IndexOptions) -> Result<Self> {
        validate_index_name(name)?;
        Ok(Self {
            name: name.to_owned(),
            options,
            fields: BTreeMap::new(),
            shard_width: 0,
            on_server: false,
        })
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index options.
    pub fn options(&self) -> IndexOptions {
        self.options
    }

    /// Whether columns are addressed by keys.
    pub fn keys(&self) -> bool {
        self.options.keys
    }

    /// Whether the server tracks column existence.
    pub fn track_existence(&self) -> bool {
        self.options.track_existence
    }

    /// Shard width reported by the server, or the default.
    pub fn shard_width(&self) -> u64 {
        if self.shard_width == 0 {
            DEFAULT_SHARD_WIDTH
        } else {
            self.shard_width
        }
    }

    /// Whether the index is known to exist on the server.
    pub fn on_server(&self) -> bool {
        self.on_server
    }

    /// Non-owning reference for fields and queries.
    pub fn handle(&self) -> IndexRef {
        IndexRef {
            name: self.name.clone(),
            options: self.options,
        }
    }

    /// The field called `name`, created with `options` if missing.
    ///
    /// An existing field is returned as is; `options` are then ignored.
    pub fn field(&mut self, name: &str, options: FieldOptions) -> Result<Field> {
        if let Some(existing) = self.fields.get(name) {
            return Ok(existing.clone());
        }
        validate_field_name(name)?;
        options.validate(name)?;
        let field = Field {
            name: name.to_owned(),
            index: self.handle(),
            options,
            on_server: false,
        };
        self.fields.insert(name.to_owned(), field.clone());
        Ok(field)
    }

    /// The field called `name`, if defined.
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Drop the local definition of a field.
    pub fn remove_field(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    /// Options as a creation request body.
    pub fn meta(&self) -> IndexMeta {
        self.options.to_meta()
    }

    pub(crate) fn mark_field_on_server(&mut self, name: &str) {
        if let Some(field) = self.fields.get_mut(name) {
            field.on_server = true;
        }
    }
}

/// A creation operation produced by [`diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOp {
    /// Create an index.
    CreateIndex {
        /// Index name.
        name: String,
        /// Index options.
        options: IndexOptions,
    },
    /// Create a field on an existing or just-created index.
    CreateField(Field),
}

impl SchemaOp {
    /// Index the operation targets.
    pub fn index_name(&self) -> &str {
        match self {
            Self::CreateIndex { name, .. } => name,
            Self::CreateField(field) => field.index_name(),
        }
    }
}

/// All indexes known locally, or a server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    indexes: BTreeMap<String, Index>,
}

impl Schema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// The index called `name`, created with `options` if missing.
    ///
    /// An existing index is returned as is; `options` are then ignored.
    pub fn index(&mut self, name: &str, options: IndexOptions) -> Result<&mut Index> {
        if !self.indexes.contains_key(name) {
            let index = Index::new(name, options)?;
            self.indexes.insert(name.to_owned(), index);
        }
        self.indexes.get_mut(name).ok_or_else(|| PilosaError::InvalidIdentifier {
            kind: "index name",
            value: name.to_owned(),
        })
    }

    /// The index called `name`, if defined.
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    /// Mutable access to the index called `name`, if defined.
    pub fn get_index_mut(&mut self, name: &str) -> Option<&mut Index> {
        self.indexes.get_mut(name)
    }

    /// Indexes in name order.
    pub fn indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    /// Number of indexes.
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// True when no index is defined.
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Drop the local definition of an index.
    pub fn remove_index(&mut self, name: &str) -> Option<Index> {
        self.indexes.remove(name)
    }

    /// Build a snapshot from a server schema document. Everything in it is
    /// marked as existing on the server; the reserved field is skipped.
    pub fn from_document(doc: &SchemaDocument) -> Result<Self> {
        let mut schema = Self::new();
        for info in &doc.indexes {
            let options = IndexOptions {
                keys: info.options.keys,
                track_existence: info.options.track_existence,
            };
            let index = schema.index(&info.name, options)?;
            index.shard_width = info.shard_width;
            index.on_server = true;
            for field_info in &info.fields {
                if field_info.name == RESERVED_FIELD {
                    continue;
                }
                let options = FieldOptions::from_meta(&field_info.name, &field_info.options)?;
                index.field(&field_info.name, options)?;
                index.mark_field_on_server(&field_info.name);
            }
        }
        Ok(schema)
    }

    /// Record that the index, or one of its fields, exists on the server.
    pub(crate) fn mark_on_server(&mut self, index: &str, field: Option<&str>) {
        if let Some(local) = self.indexes.get_mut(index) {
            match field {
                Some(name) => local.mark_field_on_server(name),
                None => local.on_server = true,
            }
        }
    }

    /// Pull server-only indexes and fields into this schema and mark every
    /// local entry the server knows about. Local entries are never removed.
    pub fn merge_remote(&mut self, remote: &Self) {
        for remote_index in remote.indexes.values() {
            let local = self
                .indexes
                .entry(remote_index.name.clone())
                .or_insert_with(|| Index {
                    fields: BTreeMap::new(),
                    ..remote_index.clone()
                });
            local.on_server = true;
            if local.shard_width == 0 {
                local.shard_width = remote_index.shard_width;
            }
            for remote_field in remote_index.fields.values() {
                let field = local
                    .fields
                    .entry(remote_field.name.clone())
                    .or_insert_with(|| remote_field.clone());
                field.on_server = true;
            }
        }
    }
}

/// Creation operations that bring `remote` up to `local`.
///
/// Every index creation comes before the creations of its fields. Indexes
/// and fields present on both sides must agree on their options; the first
/// disagreement fails the whole diff.
pub fn diff(local: &Schema, remote: &Schema) -> Result<Vec<SchemaOp>> {
    let mut ops = Vec::new();
    for index in local.indexes.values() {
        let remote_index = remote.indexes.get(&index.name);
        match remote_index {
            None => ops.push(SchemaOp::CreateIndex {
                name: index.name.clone(),
                options: index.options,
            }),
            Some(remote_index) => {
                if index.options.keys != remote_index.options.keys {
                    return Err(index_conflict(index, "keys", index.options.keys, remote_index.options.keys));
                }
                if index.options.track_existence != remote_index.options.track_existence {
                    return Err(index_conflict(
                        index,
                        "trackExistence",
                        index.options.track_existence,
                        remote_index.options.track_existence,
                    ));
                }
            }
        }
        for field in index.fields.values() {
            if field.name == RESERVED_FIELD {
                continue;
            }
            match remote_index.and_then(|r| r.fields.get(&field.name)) {
                None => ops.push(SchemaOp::CreateField(field.clone())),
                Some(remote_field) => {
                    if let Some((option, local, remote)) = field.options.conflict_with(&remote_field.options) {
                        return Err(PilosaError::SchemaConflict {
                            index: index.name.clone(),
                            field: Some(field.name.clone()),
                            option,
                            local,
                            remote,
                        });
                    }
                }
            }
        }
    }
    Ok(ops)
}

fn index_conflict(index: &Index, option: &'static str, local: bool, remote: bool) -> PilosaError {
    PilosaError::SchemaConflict {
        index: index.name.clone(),
        field: None,
        option,
        local: local.to_string(),
        remote: remote.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pilosa_proto::{FieldInfo, IndexInfo};

    fn sample() -> Schema {
        let mut schema = Schema::new();
        let repo = schema.index("repo", IndexOptions::default()).unwrap();
        repo.field("stars", FieldOptions::int(0, 1000)).unwrap();
        repo.field("tags", FieldOptions::set().with_cache(CacheType::Ranked, 5000)).unwrap();
        repo.field("seen", FieldOptions::time(TimeQuantum::YMD)).unwrap();
        schema
            .index("user", IndexOptions { keys: true, track_existence: true })
            .unwrap()
            .field("lang", FieldOptions::mutex().with_keys(true))
            .unwrap();
        schema
    }

    #[test]
    fn quantum_units_run_coarse_to_fine() {
        assert_eq!(TimeQuantum::YMDH.units(), &[TimeUnit::Year, TimeUnit::Month, TimeUnit::Day, TimeUnit::Hour]);
        assert_eq!(TimeQuantum::MD.finest(), Some(TimeUnit::Day));
        assert_eq!(TimeQuantum::None.finest(), None);
        assert_eq!(TimeQuantum::parse("DH"), Some(TimeQuantum::DH));
        assert_eq!(TimeQuantum::parse("YD"), None);
    }

    #[test]
    fn invalid_names_and_options_are_rejected() {
        let mut schema = Schema::new();
        assert!(matches!(
            schema.index("Bad", IndexOptions::default()),
            Err(PilosaError::InvalidIdentifier { .. })
        ));
        let index = schema.index("ok", IndexOptions::default()).unwrap();
        assert!(matches!(
            index.field("n", FieldOptions::int(10, 1)),
            Err(PilosaError::InvalidFieldOptions { .. })
        ));
        assert!(matches!(
            index.field("t", FieldOptions::time(TimeQuantum::None)),
            Err(PilosaError::InvalidFieldOptions { .. })
        ));
        assert!(index.get_field("n").is_none());
    }

    #[test]
    fn field_refers_back_to_its_index() {
        let schema = sample();
        let lang = schema.get_index("user").unwrap().get_field("lang").unwrap();
        assert_eq!(lang.index_name(), "user");
        assert!(lang.index().options().keys);
    }

    #[test]
    fn diff_against_self_is_empty() {
        let schema = sample();
        assert!(diff(&schema, &schema).unwrap().is_empty());
    }

    #[test]
    fn diff_against_empty_creates_indexes_before_fields() {
        let ops = diff(&sample(), &Schema::new()).unwrap();
        let names: Vec<String> = ops
            .iter()
            .map(|op| match op {
                SchemaOp::CreateIndex { name, .. } => format!("index:{name}"),
                SchemaOp::CreateField(f) => format!("field:{}/{}", f.index_name(), f.name()),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "index:repo",
                "field:repo/seen",
                "field:repo/stars",
                "field:repo/tags",
                "index:user",
                "field:user/lang",
            ]
        );
    }

    #[test]
    fn diff_reports_first_field_conflict() {
        let local = sample();
        let mut remote = Schema::new();
        let repo = remote.index("repo", IndexOptions::default()).unwrap();
        repo.field("stars", FieldOptions::int(0, 500)).unwrap();
        let err = diff(&local, &remote).unwrap_err();
        assert!(matches!(
            err,
            PilosaError::SchemaConflict { ref index, field: Some(ref field), option: "max", .. }
                if index == "repo" && field == "stars"
        ));
    }

    #[test]
    fn diff_reports_index_option_conflict() {
        let local = sample();
        let mut remote = Schema::new();
        remote.index("user", IndexOptions { keys: false, track_existence: true }).unwrap();
        assert!(matches!(
            diff(&local, &remote),
            Err(PilosaError::SchemaConflict { field: None, option: "keys", .. })
        ));
    }

    #[test]
    fn default_cache_does_not_conflict_with_server_values() {
        let mut local = Schema::new();
        local.index("i", IndexOptions::default()).unwrap().field("f", FieldOptions::set()).unwrap();
        let mut remote = Schema::new();
        remote
            .index("i", IndexOptions::default())
            .unwrap()
            .field("f", FieldOptions::set().with_cache(CacheType::Ranked, 50000))
            .unwrap();
        assert!(diff(&local, &remote).unwrap().is_empty());
    }

    #[test]
    fn meta_round_trips_through_server_form() {
        let schema = sample();
        for index in schema.indexes() {
            for field in index.fields() {
                let back = FieldOptions::from_meta(field.name(), &field.meta()).unwrap();
                assert_eq!(&back, field.options(), "{}", field.name());
            }
        }
    }

    #[test]
    fn from_document_skips_reserved_field_and_marks_on_server() {
        let doc = SchemaDocument {
            indexes: vec![IndexInfo {
                name: "repo".into(),
                options: IndexMeta { keys: false, track_existence: true },
                fields: vec![
                    FieldInfo { name: "exists".into(), options: FieldMeta::default() },
                    FieldInfo {
                        name: "seen".into(),
                        options: FieldMeta { time_quantum: Some("YM".into()), ..FieldMeta::default() },
                    },
                ],
                shard_width: 0,
            }],
        };
        let schema = Schema::from_document(&doc).unwrap();
        let repo = schema.get_index("repo").unwrap();
        assert!(repo.on_server());
        assert_eq!(repo.shard_width(), DEFAULT_SHARD_WIDTH);
        assert!(repo.get_field("exists").is_none());
        let seen = repo.get_field("seen").unwrap();
        assert!(seen.on_server());
        assert_eq!(seen.options(), &FieldOptions::time(TimeQuantum::YM));
    }

    #[test]
    fn merge_remote_adds_server_only_entries() {
        let mut local = sample();
        let mut remote = Schema::new();
        remote.index("extra", IndexOptions::default()).unwrap().field("x", FieldOptions::bool()).unwrap();
        remote.index("repo", IndexOptions::default()).unwrap().field("more", FieldOptions::set()).unwrap();
        local.merge_remote(&remote);
        assert!(local.get_index("extra").unwrap().get_field("x").is_some());
        assert!(local.get_index("repo").unwrap().get_field("more").unwrap().on_server());
        assert!(local.get_index("repo").unwrap().get_field("stars").is_some());
        assert!(!local.get_index("user").unwrap().on_server());
    }
}
