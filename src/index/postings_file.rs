/// Writes a term's postings into a file of the store: a segment count,
/// then one header + compressed payload per segment. Each posting list
/// gets a store file of its own; the lazy leaf reads the directory back
/// and decompresses segments on demand.
use std::sync::Arc;

use crate::codec::{encode_segment, split_with_sizes, MAX_SEGMENT_SIZE, TARGET_SEGMENT_SIZE};
use crate::error::{QuarryError, Result};
use crate::extent::Offset;
use crate::store::{FileNo, FileStore, StoreFile};

/// Write postings with the default segment sizes; returns the handle of
/// the created file.
pub fn write_postings(store: &Arc<FileStore>, postings: &[Offset]) -> Result<FileNo> {
    write_postings_with_sizes(store, postings, TARGET_SEGMENT_SIZE, MAX_SEGMENT_SIZE)
}

pub fn write_postings_with_sizes(
    store: &Arc<FileStore>,
    postings: &[Offset],
    target: usize,
    max: usize,
) -> Result<FileNo> {
    if postings.is_empty() {
        return Err(QuarryError::Protocol(
            "refusing to write an empty posting list".into(),
        ));
    }
    let segments = split_with_sizes(postings, target, max);

    let mut buf = Vec::new();
    buf.extend_from_slice(&(segments.len() as u32).to_le_bytes());
    for segment in segments {
        let (header, payload) = encode_segment(segment);
        header.write_to(&mut buf);
        buf.extend_from_slice(&payload);
    }

    let mut file = StoreFile::create(store.clone())?;
    file.write(&buf)?;
    Ok(file.handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SegmentHeader;
    use tempfile::TempDir;

    #[test]
    fn test_written_directory_is_consistent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.store");
        let store = Arc::new(FileStore::create(&path, 512, 128, 16 * 1024).unwrap());

        let postings: Vec<Offset> = (0..50).map(|i| i * i + 1).collect();
        let handle = write_postings_with_sizes(&store, &postings, 8, 16).unwrap();

        let mut file = StoreFile::open(store, handle).unwrap();
        let mut count_buf = [0u8; 4];
        file.read_at(0, &mut count_buf).unwrap();
        let segment_count = u32::from_le_bytes(count_buf) as usize;
        assert!(segment_count > 1);

        let mut pos = 4i64;
        let mut seen = 0u32;
        let mut previous_last = -1;
        for _ in 0..segment_count {
            let mut header_buf = [0u8; SegmentHeader::DISK_SIZE];
            file.read_at(pos, &mut header_buf).unwrap();
            let header = SegmentHeader::read_from(&header_buf).unwrap();
            assert!(header.first_element > previous_last);
            assert!(header.first_element <= header.last_element);
            previous_last = header.last_element;
            seen += header.posting_count;
            pos += (SegmentHeader::DISK_SIZE as i64) + header.byte_length as i64;
        }
        assert_eq!(seen as usize, postings.len());
        assert_eq!(pos, file.size());
    }

    #[test]
    fn test_empty_postings_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.store");
        let store = Arc::new(FileStore::create(&path, 512, 128, 16 * 1024).unwrap());
        assert!(write_postings(&store, &[]).is_err());
    }
}
