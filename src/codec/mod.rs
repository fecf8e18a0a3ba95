/// Posting-list codec: delta encoding + variable-byte compression.
///
/// A strictly increasing posting sequence p_0 < p_1 < ... is stored as
/// d_0 = p_0 followed by the gaps d_i = p_i - p_{i-1}, each gap emitted
/// low 7 bits first with the high bit set on every byte except the last.
/// Long lists are cut into segments; each segment carries a small header
/// so a probe can skip it without decompressing the payload.
use crate::error::{QuarryError, Result};
use crate::extent::Offset;

/// Preferred number of postings per segment.
pub const TARGET_SEGMENT_SIZE: usize = 32768;

/// Hard upper bound on postings per segment.
pub const MAX_SEGMENT_SIZE: usize = 65536;

/// Describes one compressed segment of a posting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Number of postings in the segment.
    pub posting_count: u32,
    /// Exact byte length of the compressed payload.
    pub byte_length: u32,
    /// First posting, absolute and uncompressed.
    pub first_element: Offset,
    /// Last posting, absolute and uncompressed.
    pub last_element: Offset,
}

impl SegmentHeader {
    pub const DISK_SIZE: usize = 4 + 4 + 8 + 8;

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.posting_count.to_le_bytes());
        buf.extend_from_slice(&self.byte_length.to_le_bytes());
        buf.extend_from_slice(&self.first_element.to_le_bytes());
        buf.extend_from_slice(&self.last_element.to_le_bytes());
    }

    pub fn read_from(data: &[u8]) -> Result<SegmentHeader> {
        if data.len() < Self::DISK_SIZE {
            return Err(QuarryError::Codec("truncated segment header".into()));
        }
        Ok(SegmentHeader {
            posting_count: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            byte_length: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            first_element: Offset::from_le_bytes(data[8..16].try_into().unwrap()),
            last_element: Offset::from_le_bytes(data[16..24].try_into().unwrap()),
        })
    }
}

/// Append a single value as a vbyte sequence.
pub fn encode_vbyte(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a single vbyte value, advancing `pos`.
pub fn decode_vbyte(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| QuarryError::Codec("truncated vbyte sequence".into()))?;
        *pos += 1;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(QuarryError::Codec("vbyte value exceeds 64 bits".into()));
        }
    }
}

/// Compress a strictly increasing, non-negative posting sequence.
pub fn encode_postings(postings: &[Offset]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(postings.len() * 2);
    let mut previous: Offset = 0;
    for (i, &p) in postings.iter().enumerate() {
        debug_assert!(p >= 0);
        let delta = if i == 0 { p } else { p - previous };
        debug_assert!(i == 0 || delta > 0);
        encode_vbyte(&mut buf, delta as u64);
        previous = p;
    }
    buf
}

/// Decompress `count` postings from a delta-coded payload.
pub fn decode_postings(data: &[u8], count: usize) -> Result<Vec<Offset>> {
    let mut postings = Vec::with_capacity(count);
    let mut pos = 0;
    let mut current: Offset = 0;
    for i in 0..count {
        let delta = decode_vbyte(data, &mut pos)? as Offset;
        if delta < 0 || (i > 0 && delta == 0) {
            return Err(QuarryError::Codec("non-increasing posting delta".into()));
        }
        current = if i == 0 { delta } else { current + delta };
        postings.push(current);
    }
    if pos != data.len() {
        return Err(QuarryError::Codec(format!(
            "{} trailing bytes after {} postings",
            data.len() - pos,
            count
        )));
    }
    Ok(postings)
}

/// Compress one segment and return its header along with the payload.
pub fn encode_segment(postings: &[Offset]) -> (SegmentHeader, Vec<u8>) {
    assert!(!postings.is_empty());
    let payload = encode_postings(postings);
    let header = SegmentHeader {
        posting_count: postings.len() as u32,
        byte_length: payload.len() as u32,
        first_element: postings[0],
        last_element: postings[postings.len() - 1],
    };
    (header, payload)
}

/// How many postings the next segment should take, given how many remain.
///
/// The final segment takes everything that still fits; a remainder just
/// above one full segment is halved so the tail does not degenerate.
pub fn next_segment_len(remaining: usize, target: usize, max: usize) -> usize {
    debug_assert!(target <= max);
    if remaining <= max {
        remaining
    } else if remaining > target + max {
        target
    } else {
        remaining / 2
    }
}

/// Split a posting sequence into segments using the default sizes.
pub fn split_into_segments(postings: &[Offset]) -> Vec<&[Offset]> {
    split_with_sizes(postings, TARGET_SEGMENT_SIZE, MAX_SEGMENT_SIZE)
}

pub fn split_with_sizes(postings: &[Offset], target: usize, max: usize) -> Vec<&[Offset]> {
    let mut segments = Vec::new();
    let mut rest = postings;
    while !rest.is_empty() {
        let take = next_segment_len(rest.len(), target, max);
        let (head, tail) = rest.split_at(take);
        segments.push(head);
        rest = tail;
    }
    segments
}
