// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packing of id-addressed records into per-shard roaring payloads.
//!
//! A record `(row, column)` becomes bit `row * shard_width + column %
//! shard_width` of the shard `column / shard_width`. Every bit lands in the
//! standard view `""`; timestamped records on a time field also land in one
//! view per unit of the field's quantum. View data is written in the
//! server's roaring format, which keeps 64-bit container keys so rows past
//! 4095 still fit.

use pilosa_proto::{encode_bitmap, ImportRoaringRequest, RoaringView};
use roaring::RoaringTreemap;
use std::collections::BTreeMap;

use super::ImportRecord;
use crate::error::{PilosaError, Result};
use crate::query::IdKey;
use crate::schema::{Field, FieldType};
use crate::timestamp::view_name;

/// Name of the view every bit is written to.
pub const STANDARD_VIEW: &str = "";

/// One shard's import request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPayload {
    /// Shard the request targets.
    pub shard: u64,
    /// Framed request.
    pub request: ImportRoaringRequest,
}

/// Reject fields the bitmap encoding cannot address.
pub(crate) fn check_field(field: &Field) -> Result<()> {
    let reason = if field.index().options().keys {
        Some("bitmap transfer needs an index without keys")
    } else if field.options().keys() {
        Some("bitmap transfer needs a field without keys")
    } else if matches!(field.options().field_type(), FieldType::Int | FieldType::Mutex) {
        Some("bitmap transfer supports set, time and bool fields only")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PilosaError::UnsupportedImportStrategy {
            field: field.name().to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

fn id(field: &Field, value: &IdKey) -> Result<u64> {
    value.id().ok_or_else(|| PilosaError::KeyIdMismatch {
        target: field.name().to_owned(),
        expected: "id",
        value: value.to_string(),
    })
}

/// Pack `records` into one payload per shard, in ascending shard order.
pub fn pack(field: &Field, shard_width: u64, records: &[ImportRecord], clear: bool) -> Result<Vec<ShardPayload>> {
    let units = field.options().time_quantum().units();
    let mut shards: BTreeMap<u64, BTreeMap<String, RoaringTreemap>> = BTreeMap::new();
    for record in records {
        let row = id(field, &record.row)?;
        let column = id(field, &record.column)?;
        let bit = row
            .checked_mul(shard_width)
            .and_then(|base| base.checked_add(column % shard_width))
            .ok_or_else(|| PilosaError::InvalidArgumentRange {
                call: "import",
                detail: format!("row {row} does not fit a shard of width {shard_width}"),
            })?;
        let views = shards.entry(column / shard_width).or_default();
        views.entry(STANDARD_VIEW.to_owned()).or_default().insert(bit);
        if let Some(ts) = record.timestamp {
            for &unit in units {
                views.entry(view_name(ts, unit)?).or_default().insert(bit);
            }
        }
    }
    shards
        .into_iter()
        .map(|(shard, views)| {
            let views = views
                .into_iter()
                .map(|(name, bitmap)| {
                    let data = encode_bitmap(bitmap.iter())?;
                    Ok(RoaringView { name, data })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ShardPayload {
                shard,
                request: ImportRoaringRequest { clear, views },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::schema::{DEFAULT_SHARD_WIDTH, FieldOptions, Index, IndexOptions, TimeQuantum};

    fn bits(view: &RoaringView) -> Vec<u64> {
        pilosa_proto::decode_bitmap(&view.data).unwrap()
    }

    fn field(options: FieldOptions) -> Field {
        let mut index = Index::new("people", IndexOptions::default()).unwrap();
        index.field("f", options).unwrap()
    }

    #[test]
    fn splits_per_shard_with_local_bit_positions() {
        let f = field(FieldOptions::set());
        let records = vec![
            ImportRecord::new(2, DEFAULT_SHARD_WIDTH + 5),
            ImportRecord::new(1, 3),
        ];
        let payloads = pack(&f, DEFAULT_SHARD_WIDTH, &records, false).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].shard, 0);
        assert_eq!(bits(&payloads[0].request.views[0]), vec![DEFAULT_SHARD_WIDTH + 3]);
        assert_eq!(payloads[1].shard, 1);
        assert_eq!(bits(&payloads[1].request.views[0]), vec![2 * DEFAULT_SHARD_WIDTH + 5]);
    }

    #[test]
    fn time_fields_get_one_view_per_unit() {
        let f = field(FieldOptions::time(TimeQuantum::YMDH));
        // 2017-04-24T12:14:15Z
        let records = vec![ImportRecord::new(1, 10).at(1_493_036_055)];
        let payload = &pack(&f, DEFAULT_SHARD_WIDTH, &records, true).unwrap()[0];
        assert!(payload.request.clear);
        let names: Vec<&str> = payload.request.views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["", "2017", "201704", "20170424", "2017042412"]);
        for view in &payload.request.views {
            assert_eq!(bits(view), vec![DEFAULT_SHARD_WIDTH + 10]);
        }
    }

    #[test]
    fn untimed_records_only_hit_the_standard_view() {
        let f = field(FieldOptions::time(TimeQuantum::YM));
        let payload = &pack(&f, DEFAULT_SHARD_WIDTH, &[ImportRecord::new(0, 1)], false).unwrap()[0];
        assert_eq!(payload.request.views.len(), 1);
        assert_eq!(payload.request.views[0].name, STANDARD_VIEW);
    }

    #[test]
    fn view_data_uses_the_server_cookie() {
        let f = field(FieldOptions::set());
        let payload = &pack(&f, DEFAULT_SHARD_WIDTH, &[ImportRecord::new(1, 10)], false).unwrap()[0];
        let data = &payload.request.views[0].data;
        assert_eq!(&data[..4], &[0x3C, 0x30, 0x00, 0x00]);
        assert_eq!(bits(&payload.request.views[0]), vec![DEFAULT_SHARD_WIDTH + 10]);
    }

    #[test]
    fn high_rows_keep_their_bits() {
        let f = field(FieldOptions::set());
        let payload = &pack(&f, DEFAULT_SHARD_WIDTH, &[ImportRecord::new(5000, 3)], false).unwrap()[0];
        assert_eq!(bits(&payload.request.views[0]), vec![5000 * DEFAULT_SHARD_WIDTH + 3]);
    }

    #[test]
    fn keyed_records_are_rejected() {
        let f = field(FieldOptions::set());
        let err = pack(&f, DEFAULT_SHARD_WIDTH, &[ImportRecord::new("a", 1)], false).unwrap_err();
        assert!(matches!(err, PilosaError::KeyIdMismatch { expected: "id", .. }));
    }

    #[test]
    fn keyed_and_int_fields_cannot_use_bitmaps() {
        let mut keyed = Index::new("keyed", IndexOptions { keys: true, track_existence: false }).unwrap();
        let on_keyed_index = keyed.field("f", FieldOptions::set()).unwrap();
        assert!(matches!(
            check_field(&on_keyed_index),
            Err(PilosaError::UnsupportedImportStrategy { .. })
        ));
        assert!(check_field(&field(FieldOptions::set().with_keys(true))).is_err());
        assert!(check_field(&field(FieldOptions::int(0, 10))).is_err());
        assert!(check_field(&field(FieldOptions::mutex())).is_err());
        assert!(check_field(&field(FieldOptions::time(TimeQuantum::D))).is_ok());
        assert!(check_field(&field(FieldOptions::bool())).is_ok());
    }
}
