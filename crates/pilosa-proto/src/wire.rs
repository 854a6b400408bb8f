// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Framing for `import-roaring` payloads.
//!
//! Layout (protobuf-compatible, field numbers fixed by the server):
//!
//! ```text
//! ImportRoaringRequest { 1: bool clear, 2: repeated RoaringView views }
//! RoaringView          { 1: string name, 2: bytes data }
//! ```
//!
//! `data` is a bitmap in the server's roaring format ([`crate::bitmap`]).
//! This module only frames it; packing happens in the client.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Errors raised while decoding a framed payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Input ended in the middle of a value.
    #[error("truncated frame")]
    Truncated,
    /// A varint ran past 64 bits.
    #[error("varint overflow")]
    VarintOverflow,
    /// Wire type this framing does not use.
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),
    /// View name is not UTF-8.
    #[error("view name is not valid utf-8")]
    InvalidUtf8,
    /// Bitmap does not start with the roaring cookie.
    #[error("unknown bitmap cookie {0:#010x}")]
    UnknownCookie(u32),
    /// Bitmap container of an unknown type.
    #[error("unknown bitmap container type {0}")]
    UnknownContainer(u16),
    /// Bit positions handed to the encoder were not strictly ascending.
    #[error("bit positions must be strictly ascending")]
    UnsortedPositions,
    /// Bitmap too large for 32-bit offsets.
    #[error("bitmap exceeds 4 GiB")]
    TooLarge,
}

/// One named view and its serialized bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoaringView {
    /// View name; `""` is the standard view.
    pub name: String,
    /// Roaring bitmap bytes, see [`crate::bitmap`].
    pub data: Vec<u8>,
}

/// Bitmap-transfer import request for one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRoaringRequest {
    /// Clear the bits instead of setting them.
    pub clear: bool,
    /// Views to import.
    pub views: Vec<RoaringView>,
}

impl ImportRoaringRequest {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        if self.clear {
            put_key(&mut out, 1, WIRE_VARINT);
            put_varint(&mut out, 1);
        }
        for view in &self.views {
            let mut inner = BytesMut::with_capacity(view.name.len() + view.data.len() + 8);
            if !view.name.is_empty() {
                put_key(&mut inner, 1, WIRE_LEN);
                put_bytes(&mut inner, view.name.as_bytes());
            }
            if !view.data.is_empty() {
                put_key(&mut inner, 2, WIRE_LEN);
                put_bytes(&mut inner, &view.data);
            }
            put_key(&mut out, 2, WIRE_LEN);
            put_bytes(&mut out, &inner);
        }
        out.to_vec()
    }

    /// Decode from wire bytes. Unknown fields are skipped.
    pub fn decode(mut buf: &[u8]) -> Result<Self, FrameError> {
        let mut req = Self::default();
        while buf.has_remaining() {
            let (field, wire) = get_key(&mut buf)?;
            match (field, wire) {
                (1, WIRE_VARINT) => req.clear = get_varint(&mut buf)? != 0,
                (2, WIRE_LEN) => {
                    let inner = get_bytes(&mut buf)?;
                    req.views.push(decode_view(inner)?);
                }
                (_, wire) => skip(&mut buf, wire)?,
            }
        }
        Ok(req)
    }
}

fn decode_view(mut buf: &[u8]) -> Result<RoaringView, FrameError> {
    let mut view = RoaringView::default();
    while buf.has_remaining() {
        let (field, wire) = get_key(&mut buf)?;
        match (field, wire) {
            (1, WIRE_LEN) => {
                let raw = get_bytes(&mut buf)?;
                view.name = String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8)?;
            }
            (2, WIRE_LEN) => view.data = get_bytes(&mut buf)?.to_vec(),
            (_, wire) => skip(&mut buf, wire)?,
        }
    }
    Ok(view)
}

fn put_key(out: &mut BytesMut, field: u32, wire: u8) {
    put_varint(out, (u64::from(field) << 3) | u64::from(wire));
}

#[allow(clippy::cast_possible_truncation)]
fn put_varint(out: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

fn put_bytes(out: &mut BytesMut, bytes: &[u8]) {
    put_varint(out, bytes.len() as u64);
    out.put_slice(bytes);
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, FrameError> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(FrameError::Truncated);
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(FrameError::VarintOverflow)
}

#[allow(clippy::cast_possible_truncation)]
fn get_key(buf: &mut &[u8]) -> Result<(u64, u8), FrameError> {
    let key = get_varint(buf)?;
    Ok((key >> 3, (key & 0x7) as u8))
}

fn get_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], FrameError> {
    let len = usize::try_from(get_varint(buf)?).map_err(|_| FrameError::Truncated)?;
    let rest: &'a [u8] = *buf;
    if rest.len() < len {
        return Err(FrameError::Truncated);
    }
    let (head, tail) = rest.split_at(len);
    *buf = tail;
    Ok(head)
}

fn skip(buf: &mut &[u8], wire: u8) -> Result<(), FrameError> {
    let width = match wire {
        WIRE_VARINT => {
            get_varint(buf)?;
            return Ok(());
        }
        WIRE_LEN => {
            get_bytes(buf)?;
            return Ok(());
        }
        WIRE_FIXED64 => 8,
        WIRE_FIXED32 => 4,
        other => return Err(FrameError::UnsupportedWireType(other)),
    };
    if buf.remaining() < width {
        return Err(FrameError::Truncated);
    }
    buf.advance(width);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn encodes_known_layout() {
        let req = ImportRoaringRequest {
            clear: true,
            views: vec![RoaringView {
                name: "2017".into(),
                data: vec![0xAA],
            }],
        };
        assert_eq!(
            req.encode(),
            vec![0x08, 0x01, 0x12, 0x09, 0x0A, 0x04, b'2', b'0', b'1', b'7', 0x12, 0x01, 0xAA]
        );
    }

    #[test]
    fn decode_reads_back_views_and_clear_flag() {
        let req = ImportRoaringRequest {
            clear: false,
            views: vec![
                RoaringView { name: String::new(), data: vec![1, 2, 3] },
                RoaringView { name: "201704".into(), data: vec![0; 300] },
            ],
        };
        assert_eq!(ImportRoaringRequest::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn decode_skips_unknown_fields() {
        // field 9 varint, then field 1 = true
        let bytes = [0x48, 0x05, 0x08, 0x01];
        let req = ImportRoaringRequest::decode(&bytes).unwrap();
        assert!(req.clear);
        assert!(req.views.is_empty());
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert_eq!(
            ImportRoaringRequest::decode(&[0x12, 0x05, 0x0A]),
            Err(FrameError::Truncated)
        );
    }
}
