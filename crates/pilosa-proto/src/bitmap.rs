// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The server's roaring bitmap file format.
//!
//! Positions are 64-bit. Each container holds the positions sharing the same
//! upper 48 bits (the container key). All integers are little-endian.
//!
//! ```text
//! u32 cookie            magic 12348 in the low 16 bits, storage version above
//! u32 container count
//! per container:        u64 key, u16 type, u16 cardinality - 1
//! per container:        u32 offset of its data from the start of the file
//! container data:       array  = cardinality x u16
//!                       bitmap = 1024 x u64
//!                       run    = u16 run count, then (u16 start, u16 last) pairs
//! ```
//!
//! The encoder writes array and bitmap containers; the decoder also reads
//! run containers.

use bytes::{Buf, BufMut, BytesMut};

use crate::wire::FrameError;

/// Identifies the format in the low half of the cookie.
pub const MAGIC_NUMBER: u32 = 12348;
/// Storage version in the high half of the cookie.
pub const STORAGE_VERSION: u32 = 0;
const COOKIE: u32 = MAGIC_NUMBER | (STORAGE_VERSION << 16);

const HEADER_BASE: usize = 8;
const DESCRIPTOR: usize = 12;
const OFFSET: usize = 4;

const ARRAY: u16 = 1;
const BITMAP: u16 = 2;
const RUN: u16 = 3;

/// Largest array container; anything bigger is written as a bitmap.
pub const ARRAY_MAX: usize = 4096;
const BITMAP_WORDS: usize = 1024;

struct Container {
    key: u64,
    values: Vec<u16>,
}

impl Container {
    fn kind(&self) -> u16 {
        if self.values.len() <= ARRAY_MAX {
            ARRAY
        } else {
            BITMAP
        }
    }

    fn data_len(&self) -> usize {
        match self.kind() {
            ARRAY => self.values.len() * 2,
            _ => BITMAP_WORDS * 8,
        }
    }

    fn write(&self, out: &mut BytesMut) {
        if self.kind() == ARRAY {
            for v in &self.values {
                out.put_u16_le(*v);
            }
            return;
        }
        let mut words = [0u64; BITMAP_WORDS];
        for v in &self.values {
            words[usize::from(*v >> 6)] |= 1 << (v & 63);
        }
        for word in words {
            out.put_u64_le(word);
        }
    }
}

fn containers(positions: impl IntoIterator<Item = u64>) -> Result<Vec<Container>, FrameError> {
    let mut out: Vec<Container> = Vec::new();
    let mut previous: Option<u64> = None;
    for position in positions {
        if previous.is_some_and(|p| p >= position) {
            return Err(FrameError::UnsortedPositions);
        }
        previous = Some(position);
        let key = position >> 16;
        #[allow(clippy::cast_possible_truncation)]
        let low = (position & 0xFFFF) as u16;
        match out.last_mut() {
            Some(container) if container.key == key => container.values.push(low),
            _ => out.push(Container { key, values: vec![low] }),
        }
    }
    Ok(out)
}

/// Encode strictly ascending bit positions.
pub fn encode_bitmap(positions: impl IntoIterator<Item = u64>) -> Result<Vec<u8>, FrameError> {
    let containers = containers(positions)?;
    let count = u32::try_from(containers.len()).map_err(|_| FrameError::TooLarge)?;
    let header = HEADER_BASE + containers.len() * (DESCRIPTOR + OFFSET);
    let total = header + containers.iter().map(Container::data_len).sum::<usize>();

    let mut out = BytesMut::with_capacity(total);
    out.put_u32_le(COOKIE);
    out.put_u32_le(count);
    for container in &containers {
        out.put_u64_le(container.key);
        out.put_u16_le(container.kind());
        let cardinality = u16::try_from(container.values.len() - 1).map_err(|_| FrameError::TooLarge)?;
        out.put_u16_le(cardinality);
    }
    let mut offset = header;
    for container in &containers {
        out.put_u32_le(u32::try_from(offset).map_err(|_| FrameError::TooLarge)?);
        offset += container.data_len();
    }
    for container in &containers {
        container.write(&mut out);
    }
    Ok(out.to_vec())
}

/// Decode a bitmap into its ascending bit positions.
pub fn decode_bitmap(data: &[u8]) -> Result<Vec<u64>, FrameError> {
    let mut head = data;
    if head.remaining() < HEADER_BASE {
        return Err(FrameError::Truncated);
    }
    let cookie = head.get_u32_le();
    if cookie & 0xFFFF != MAGIC_NUMBER {
        return Err(FrameError::UnknownCookie(cookie));
    }
    let count = usize::try_from(head.get_u32_le()).map_err(|_| FrameError::TooLarge)?;
    let needed = count.checked_mul(DESCRIPTOR + OFFSET).ok_or(FrameError::TooLarge)?;
    if head.remaining() < needed {
        return Err(FrameError::Truncated);
    }
    let mut descriptors = Vec::with_capacity(count);
    for _ in 0..count {
        let key = head.get_u64_le();
        let kind = head.get_u16_le();
        let cardinality = usize::from(head.get_u16_le()) + 1;
        descriptors.push((key, kind, cardinality));
    }
    let mut positions = Vec::new();
    for (key, kind, cardinality) in descriptors {
        let offset = usize::try_from(head.get_u32_le()).map_err(|_| FrameError::TooLarge)?;
        let mut body = data.get(offset..).ok_or(FrameError::Truncated)?;
        let base = key << 16;
        match kind {
            ARRAY => {
                if body.remaining() < cardinality * 2 {
                    return Err(FrameError::Truncated);
                }
                for _ in 0..cardinality {
                    positions.push(base | u64::from(body.get_u16_le()));
                }
            }
            BITMAP => {
                if body.remaining() < BITMAP_WORDS * 8 {
                    return Err(FrameError::Truncated);
                }
                for word_index in (0_u64..).take(BITMAP_WORDS) {
                    let mut word = body.get_u64_le();
                    while word != 0 {
                        let bit = u64::from(word.trailing_zeros());
                        positions.push(base | (word_index << 6) | bit);
                        word &= word - 1;
                    }
                }
            }
            RUN => {
                if body.remaining() < 2 {
                    return Err(FrameError::Truncated);
                }
                let runs = usize::from(body.get_u16_le());
                if body.remaining() < runs * 4 {
                    return Err(FrameError::Truncated);
                }
                for _ in 0..runs {
                    let start = body.get_u16_le();
                    let last = body.get_u16_le();
                    positions.extend((start..=last).map(|v| base | u64::from(v)));
                }
            }
            other => return Err(FrameError::UnknownContainer(other)),
        }
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn single_bit_matches_known_bytes() {
        // row 1, column 10 of shard 0 at width 2^20
        let bytes = encode_bitmap([(1 << 20) + 10]).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x3C, 0x30, 0x00, 0x00, // cookie 12348, version 0
                0x01, 0x00, 0x00, 0x00, // one container
                0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // key 16
                0x01, 0x00, // array
                0x00, 0x00, // cardinality 1
                0x18, 0x00, 0x00, 0x00, // data at 24
                0x0A, 0x00, // 10
            ]
        );
    }

    #[test]
    fn keys_above_32_bits_survive() {
        let positions = vec![5, 4096 << 20, (u64::from(u32::MAX) << 20) + 7];
        let bytes = encode_bitmap(positions.iter().copied()).unwrap();
        assert_eq!(decode_bitmap(&bytes).unwrap(), positions);
    }

    #[test]
    fn dense_containers_become_bitmaps() {
        let positions: Vec<u64> = (0..5000).map(|v| (3 << 16) + v * 2).collect();
        let bytes = encode_bitmap(positions.iter().copied()).unwrap();
        assert_eq!(&bytes[16..18], &BITMAP.to_le_bytes());
        assert_eq!(&bytes[18..20], &4999_u16.to_le_bytes());
        assert_eq!(bytes.len(), 8 + 12 + 4 + 8192);
        assert_eq!(decode_bitmap(&bytes).unwrap(), positions);
    }

    #[test]
    fn run_containers_decode() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&COOKIE.to_le_bytes());
        bytes.extend_from_slice(&1_u32.to_le_bytes());
        bytes.extend_from_slice(&2_u64.to_le_bytes());
        bytes.extend_from_slice(&RUN.to_le_bytes());
        bytes.extend_from_slice(&4_u16.to_le_bytes());
        bytes.extend_from_slice(&24_u32.to_le_bytes());
        bytes.extend_from_slice(&[0x02, 0x00, 0x01, 0x00, 0x02, 0x00, 0x09, 0x00, 0x0B, 0x00]);
        assert_eq!(
            decode_bitmap(&bytes).unwrap(),
            vec![(2 << 16) + 1, (2 << 16) + 2, (2 << 16) + 9, (2 << 16) + 10, (2 << 16) + 11]
        );
    }

    #[test]
    fn empty_bitmap_is_just_a_header() {
        let bytes = encode_bitmap(Vec::new()).unwrap();
        assert_eq!(bytes, vec![0x3C, 0x30, 0, 0, 0, 0, 0, 0]);
        assert!(decode_bitmap(&bytes).unwrap().is_empty());
    }

    #[test]
    fn unsorted_input_is_rejected() {
        assert_eq!(encode_bitmap([3, 1]), Err(FrameError::UnsortedPositions));
        assert_eq!(encode_bitmap([3, 3]), Err(FrameError::UnsortedPositions));
    }

    #[test]
    fn foreign_formats_are_rejected() {
        // a 64-bit map count of one, as other roaring layouts start
        let bytes = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode_bitmap(&bytes), Err(FrameError::UnknownCookie(1)));
        assert_eq!(decode_bitmap(&[0x3C, 0x30]), Err(FrameError::Truncated));
    }
}
