/// On-disk posting leaf: a segmented, delta+vbyte compressed posting list
/// living in one file of the store. Segment headers are loaded up front;
/// payloads decompress lazily, and a probe answered by the header alone
/// (first or last posting of a segment) never touches the payload.
///
/// Storage failures never surface through the navigation primitives: the
/// list poisons itself, behaves as empty, and records the error on the
/// side channel for the query driver.
use crate::codec::{decode_postings, SegmentHeader};
use crate::error::QuarryError;
use crate::extent::postings::PostingsList;
use crate::extent::{Extent, Offset, SideChannel};
use crate::store::StoreFile;

#[derive(Clone, Copy)]
struct StoredSegment {
    header: SegmentHeader,
    payload_pos: i64,
}

pub struct StoredList {
    file: StoreFile,
    segments: Vec<StoredSegment>,
    current: Option<(usize, PostingsList)>,
    total: Offset,
    poisoned: bool,
    errors: SideChannel,
}

impl StoredList {
    /// Load the segment directory of a posting file.
    pub fn open(mut file: StoreFile, errors: SideChannel) -> crate::error::Result<StoredList> {
        let mut count_buf = [0u8; 4];
        if file.read_at(0, &mut count_buf)? != 4 {
            return Err(QuarryError::Codec("posting file too short".into()));
        }
        let segment_count = u32::from_le_bytes(count_buf) as usize;

        let mut segments = Vec::with_capacity(segment_count);
        let mut header_buf = [0u8; SegmentHeader::DISK_SIZE];
        let mut pos = 4i64;
        let mut total = 0;
        for _ in 0..segment_count {
            if file.read_at(pos, &mut header_buf)? != header_buf.len() {
                return Err(QuarryError::Codec("truncated segment directory".into()));
            }
            let header = SegmentHeader::read_from(&header_buf)?;
            let payload_pos = pos + SegmentHeader::DISK_SIZE as i64;
            total += header.posting_count as Offset;
            segments.push(StoredSegment {
                header,
                payload_pos,
            });
            pos = payload_pos + header.byte_length as i64;
        }

        Ok(StoredList {
            file,
            segments,
            current: None,
            total,
            poisoned: false,
            errors,
        })
    }

    pub fn total(&self) -> Offset {
        self.total
    }

    fn poison(&mut self, error: QuarryError) {
        self.poisoned = true;
        self.current = None;
        self.errors.record(error);
    }

    fn decoded(&mut self, idx: usize) -> Option<&mut PostingsList> {
        if self.poisoned {
            return None;
        }
        if self.current.as_ref().map(|(i, _)| *i) != Some(idx) {
            let seg = self.segments[idx];
            let mut payload = vec![0u8; seg.header.byte_length as usize];
            match self.file.read_at(seg.payload_pos, &mut payload) {
                Ok(n) if n == payload.len() => {}
                Ok(_) => {
                    self.poison(QuarryError::Codec("truncated segment payload".into()));
                    return None;
                }
                Err(e) => {
                    self.poison(e);
                    return None;
                }
            }
            match decode_postings(&payload, seg.header.posting_count as usize) {
                Ok(postings) => self.current = Some((idx, PostingsList::new(postings))),
                Err(e) => {
                    self.poison(e);
                    return None;
                }
            }
        }
        self.current.as_mut().map(|(_, list)| list)
    }

    pub fn first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        if self.poisoned {
            return None;
        }
        let idx = self
            .segments
            .partition_point(|s| s.header.last_element < position);
        let seg = self.segments.get(idx)?;
        if seg.header.first_element >= position {
            let p = seg.header.first_element;
            return Some(Extent::new(p, p));
        }
        self.decoded(idx)?.first_start_ge(position)
    }

    pub(crate) fn first_end_ge(&mut self, position: Offset) -> Option<Extent> {
        self.first_start_ge(position)
    }

    pub(crate) fn last_start_le(&mut self, position: Offset) -> Option<Extent> {
        self.last_end_le(position)
    }

    pub fn last_end_le(&mut self, position: Offset) -> Option<Extent> {
        if self.poisoned {
            return None;
        }
        let idx = self
            .segments
            .partition_point(|s| s.header.first_element <= position);
        let idx = idx.checked_sub(1)?;
        let seg = self.segments[idx];
        if seg.header.last_element <= position {
            let p = seg.header.last_element;
            return Some(Extent::new(p, p));
        }
        self.decoded(idx)?.last_end_le(position)
    }

    pub(crate) fn length(&self) -> Offset {
        if self.poisoned {
            0
        } else {
            self.total
        }
    }

    pub(crate) fn count(&mut self, start: Offset, end: Offset) -> Offset {
        if self.poisoned || end < start {
            return 0;
        }
        let mut result = 0;
        for idx in 0..self.segments.len() {
            let h = self.segments[idx].header;
            if h.last_element < start {
                continue;
            }
            if h.first_element > end {
                break;
            }
            if h.first_element >= start && h.last_element <= end {
                // Fully covered: the header already knows the answer.
                result += h.posting_count as Offset;
            } else {
                match self.decoded(idx) {
                    Some(list) => result += list.count(start, end),
                    None => return 0,
                }
            }
        }
        result
    }

    pub(crate) fn memory_usage(&self) -> usize {
        let directory = self.segments.capacity() * std::mem::size_of::<StoredSegment>();
        let decoded = self
            .current
            .as_ref()
            .map_or(0, |(_, list)| list.memory_usage());
        directory + decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::postings_file::write_postings_with_sizes;
    use crate::store::FileStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(postings: &[Offset]) -> (StoredList, SideChannel, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postings.store");
        let store = Arc::new(FileStore::create(&path, 512, 128, 16 * 1024).unwrap());
        // Tiny segments so multi-segment paths get exercised.
        let handle = write_postings_with_sizes(&store, postings, 8, 16).unwrap();
        let errors = SideChannel::new();
        let file = StoreFile::open(store, handle).unwrap();
        let list = StoredList::open(file, errors.clone()).unwrap();
        (list, errors, dir)
    }

    #[test]
    fn test_probes_across_segments() {
        let postings: Vec<Offset> = (0..100).map(|i| i * 5).collect();
        let (mut list, errors, _dir) = setup(&postings);
        assert_eq!(list.total(), 100);
        assert!(list.segments.len() > 1);

        assert_eq!(list.first_start_ge(0), Some(Extent::new(0, 0)));
        assert_eq!(list.first_start_ge(123), Some(Extent::new(125, 125)));
        assert_eq!(list.first_start_ge(495), Some(Extent::new(495, 495)));
        assert_eq!(list.first_start_ge(496), None);
        assert_eq!(list.last_end_le(123), Some(Extent::new(120, 120)));
        assert_eq!(list.last_end_le(-1), None);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_header_only_probes_skip_decoding() {
        let postings: Vec<Offset> = (0..64).map(|i| i * 10).collect();
        let (mut list, _errors, _dir) = setup(&postings);
        // A probe below the first posting is answered by the directory.
        assert_eq!(list.first_start_ge(-5), Some(Extent::new(0, 0)));
        assert!(list.current.is_none());
        // Probing past everything never decodes either.
        assert_eq!(list.first_start_ge(10_000), None);
        assert!(list.current.is_none());
    }

    #[test]
    fn test_count_mixes_header_and_decoded_segments() {
        let postings: Vec<Offset> = (0..100).map(|i| i * 5).collect();
        let (mut list, _errors, _dir) = setup(&postings);
        assert_eq!(list.count(0, 495), 100);
        // Partial window: postings 25..=250 → 5, 10, ..., 250.
        assert_eq!(list.count(25, 250), 46);
        assert_eq!(list.count(496, 1000), 0);
    }

    #[test]
    fn test_matches_in_memory_leaf() {
        let postings: Vec<Offset> = (0..200).map(|i| i * 3 + 1).collect();
        let (mut stored, _errors, _dir) = setup(&postings);
        let mut memory = PostingsList::new(postings.clone());
        for probe in [-1, 0, 1, 7, 100, 301, 598, 599, 600, 10_000] {
            assert_eq!(
                stored.first_start_ge(probe),
                memory.first_start_ge(probe),
                "first_start_ge({})",
                probe
            );
            assert_eq!(
                stored.last_end_le(probe),
                memory.last_end_le(probe),
                "last_end_le({})",
                probe
            );
        }
    }

    #[test]
    fn test_corrupt_payload_poisons_and_reports() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.store");
        let store = Arc::new(FileStore::create(&path, 512, 128, 16 * 1024).unwrap());
        let postings: Vec<Offset> = (0..32).collect();
        let handle = write_postings_with_sizes(&store, &postings, 8, 16).unwrap();

        // Fill the first payload (8 one-byte deltas) with continuation
        // bits so the decoder runs off the end of the segment.
        let mut file = StoreFile::open(store.clone(), handle).unwrap();
        file.write_at(4 + SegmentHeader::DISK_SIZE as i64, &[0x80u8; 8])
            .unwrap();

        let errors = SideChannel::new();
        let file = StoreFile::open(store, handle).unwrap();
        let mut list = StoredList::open(file, errors.clone()).unwrap();
        // Header-only probe still works...
        assert_eq!(list.first_start_ge(-1), Some(Extent::new(0, 0)));
        // ...but decoding poisons the list into emptiness.
        assert_eq!(list.first_start_ge(1), None);
        assert_eq!(list.last_end_le(100), None);
        assert_eq!(list.length(), 0);
        assert!(!errors.is_empty());
    }
}
