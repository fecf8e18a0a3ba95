/// Compact-index trailer: at the very end of a compact index file sits a
/// fixed-size header preceded by the interval directory, an array of
/// descriptors (interval byte range in the file, first and last term of
/// the interval). Relocating an index inside a larger container shifts
/// the interval offsets by the size difference.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{QuarryError, Result};

/// Terms are stored as fixed-size zero-padded byte fields.
pub const TERM_FIELD_BYTES: usize = 32;

const DESCRIPTOR_SIZE: u64 = 8 + 8 + TERM_FIELD_BYTES as u64 * 2;
const TRAILER_HEADER_SIZE: u64 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalDescriptor {
    /// Byte offset of the interval's first posting block in the file.
    pub interval_start: i64,
    /// Byte offset just past the interval.
    pub interval_end: i64,
    pub first_term: String,
    pub last_term: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactIndexTrailer {
    pub descriptors: Vec<IntervalDescriptor>,
}

fn write_term_field(buf: &mut Vec<u8>, term: &str) -> Result<()> {
    let bytes = term.as_bytes();
    if bytes.len() > TERM_FIELD_BYTES {
        return Err(QuarryError::Protocol(format!(
            "term too long for descriptor: {}",
            term
        )));
    }
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + TERM_FIELD_BYTES - bytes.len(), 0);
    Ok(())
}

fn read_term_field(data: &[u8]) -> Result<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec())
        .map_err(|_| QuarryError::Codec("descriptor term is not UTF-8".into()))
}

impl CompactIndexTrailer {
    /// Append the directory and trailer header at the file's end.
    pub fn append_to(&self, file: &mut File) -> Result<()> {
        let mut buf = Vec::new();
        for d in &self.descriptors {
            buf.extend_from_slice(&d.interval_start.to_le_bytes());
            buf.extend_from_slice(&d.interval_end.to_le_bytes());
            write_term_field(&mut buf, &d.first_term)?;
            write_term_field(&mut buf, &d.last_term)?;
        }
        buf.extend_from_slice(&(self.descriptors.len() as u64).to_le_bytes());
        file.seek(SeekFrom::End(0))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Read the trailer from the file's end. Also returns the byte
    /// offset where the directory begins.
    pub fn read_from(file: &mut File) -> Result<(CompactIndexTrailer, u64)> {
        let file_size = file.seek(SeekFrom::End(0))?;
        if file_size < TRAILER_HEADER_SIZE {
            return Err(QuarryError::Codec("no compact-index trailer".into()));
        }
        file.seek(SeekFrom::Start(file_size - TRAILER_HEADER_SIZE))?;
        let mut count_buf = [0u8; 8];
        file.read_exact(&mut count_buf)?;
        let count = u64::from_le_bytes(count_buf);

        let directory_size = count * DESCRIPTOR_SIZE;
        if file_size < TRAILER_HEADER_SIZE + directory_size {
            return Err(QuarryError::Codec(
                "compact-index trailer is truncated".into(),
            ));
        }
        let directory_start = file_size - TRAILER_HEADER_SIZE - directory_size;
        file.seek(SeekFrom::Start(directory_start))?;
        let mut buf = vec![0u8; directory_size as usize];
        file.read_exact(&mut buf)?;

        let mut descriptors = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let base = i * DESCRIPTOR_SIZE as usize;
            let interval_start =
                i64::from_le_bytes(buf[base..base + 8].try_into().unwrap());
            let interval_end =
                i64::from_le_bytes(buf[base + 8..base + 16].try_into().unwrap());
            let first_term = read_term_field(&buf[base + 16..base + 16 + TERM_FIELD_BYTES])?;
            let last_term = read_term_field(
                &buf[base + 16 + TERM_FIELD_BYTES..base + 16 + 2 * TERM_FIELD_BYTES],
            )?;
            descriptors.push(IntervalDescriptor {
                interval_start,
                interval_end,
                first_term,
                last_term,
            });
        }
        Ok((CompactIndexTrailer { descriptors }, directory_start))
    }

    /// Shift all interval offsets, as done when the index data moves to
    /// the end of a larger target file.
    pub fn relocate(&mut self, delta: i64) {
        for d in &mut self.descriptors {
            d.interval_start += delta;
            d.interval_end += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> CompactIndexTrailer {
        CompactIndexTrailer {
            descriptors: vec![
                IntervalDescriptor {
                    interval_start: 0,
                    interval_end: 4096,
                    first_term: "aardvark".into(),
                    last_term: "mongoose".into(),
                },
                IntervalDescriptor {
                    interval_start: 4096,
                    interval_end: 9000,
                    first_term: "moose".into(),
                    last_term: "zebra".into(),
                },
            ],
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.cix");
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![0xEE; 9000]).unwrap(); // interval payload
        drop(file);

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        sample().append_to(&mut file).unwrap();

        let (trailer, directory_start) = CompactIndexTrailer::read_from(&mut file).unwrap();
        assert_eq!(trailer, sample());
        assert_eq!(directory_start, 9000);
    }

    #[test]
    fn test_relocate_shifts_intervals_only() {
        let mut trailer = sample();
        trailer.relocate(1_000_000);
        assert_eq!(trailer.descriptors[0].interval_start, 1_000_000);
        assert_eq!(trailer.descriptors[0].interval_end, 1_004_096);
        assert_eq!(trailer.descriptors[1].interval_end, 1_009_000);
        assert_eq!(trailer.descriptors[0].first_term, "aardvark");
    }

    #[test]
    fn test_overlong_term_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.cix");
        let mut file = File::create(&path).unwrap();
        let trailer = CompactIndexTrailer {
            descriptors: vec![IntervalDescriptor {
                interval_start: 0,
                interval_end: 1,
                first_term: "x".repeat(TERM_FIELD_BYTES + 1),
                last_term: "y".into(),
            }],
        };
        assert!(trailer.append_to(&mut file).is_err());
    }

    #[test]
    fn test_truncated_trailer_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.cix");
        std::fs::write(&path, 99u64.to_le_bytes()).unwrap();
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert!(CompactIndexTrailer::read_from(&mut file).is_err());
    }
}
