/// Index-to-text map: an append-only sequence of (index position, file
/// byte position) pairs, sorted by index position. A sparse in-memory
/// directory (one entry per 2048 pairs) narrows a lookup to one chunk,
/// which is then scanned linearly from disk.
///
/// `filter` rewrites the map against a list of still-visible file
/// extents: pairs are copied block-wise into a fresh file that atomically
/// replaces the old one.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::error;
use parking_lot::Mutex;

use crate::error::{QuarryError, Result};
use crate::extent::{ExtentList, Offset};

/// One sparse directory entry per this many on-disk pairs.
pub const INDEX_GRANULARITY: u64 = 2048;

/// Pairs per read when scanning or filtering the map.
const BLOCK_SIZE: usize = 256;

const PAIR_SIZE: u64 = 16;
const HEADER_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy)]
struct SparseEntry {
    /// Ordinal of the first pair of this chunk.
    position_in_map: u64,
    index_position: Offset,
    chunk_size: u32,
}

struct MapInner {
    file: File,
    path: PathBuf,
    disk_count: u64,
    last_index_position: Offset,
    sparse: Vec<SparseEntry>,
}

pub struct IndexToText {
    inner: Mutex<MapInner>,
}

fn pair_offset(ordinal: u64) -> u64 {
    HEADER_SIZE + ordinal * PAIR_SIZE
}

impl IndexToText {
    /// Create a fresh, empty map file.
    pub fn create(path: &Path) -> Result<IndexToText> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&0u64.to_le_bytes())?;
        Ok(IndexToText {
            inner: Mutex::new(MapInner {
                file,
                path: path.to_path_buf(),
                disk_count: 0,
                last_index_position: -1,
                sparse: Vec::new(),
            }),
        })
    }

    /// Open an existing map and rebuild the sparse directory.
    pub fn open(path: &Path) -> Result<IndexToText> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut inner = MapInner {
            file,
            path: path.to_path_buf(),
            disk_count: 0,
            last_index_position: -1,
            sparse: Vec::new(),
        };
        inner.reload()?;
        Ok(IndexToText {
            inner: Mutex::new(inner),
        })
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().disk_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one mapping; index positions must be strictly increasing.
    pub fn append(&self, index_position: Offset, file_position: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if index_position <= inner.last_index_position {
            return Err(QuarryError::Protocol(format!(
                "index position {} not increasing (last {})",
                index_position, inner.last_index_position
            )));
        }
        let ordinal = inner.disk_count;
        inner.write_pair(ordinal, index_position, file_position)?;
        if ordinal % INDEX_GRANULARITY == 0 {
            inner.sparse.push(SparseEntry {
                position_in_map: ordinal,
                index_position,
                chunk_size: 0,
            });
        }
        inner.sparse.last_mut().expect("chunk exists").chunk_size += 1;
        inner.disk_count += 1;
        inner.last_index_position = index_position;
        inner.write_header()?;
        Ok(())
    }

    /// The mapping with the largest index position <= `where`.
    pub fn last_smaller_eq(&self, where_: Offset) -> Result<Option<(Offset, i64)>> {
        let mut inner = self.inner.lock();
        if inner.disk_count == 0 {
            return Ok(None);
        }
        if inner.sparse[0].index_position > where_ {
            return Ok(None);
        }
        // Binary search over the directory, then a linear pass through
        // the selected chunk.
        let mut lower = 0usize;
        let mut upper = inner.sparse.len() - 1;
        while upper > lower {
            let middle = (upper + lower + 1) >> 1;
            if inner.sparse[middle].index_position > where_ {
                upper = middle - 1;
            } else {
                lower = middle;
            }
        }
        let chunk = inner.sparse[lower];
        let pairs = inner.read_pairs(chunk.position_in_map, chunk.chunk_size as usize)?;
        let mut result = None;
        for (index_position, file_position) in pairs {
            if index_position <= where_ {
                result = Some((index_position, file_position));
            }
        }
        Ok(result)
    }

    /// Keep only mappings whose index position lies inside some extent of
    /// `files`; the rewritten map replaces the old file atomically.
    pub fn filter(&self, files: &mut ExtentList) -> Result<()> {
        let mut inner = self.inner.lock();
        let temp_path = inner.path.with_extension("map.temp");
        let mut temp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        temp.write_all(&0u64.to_le_bytes())?;

        let mut kept: u64 = 0;
        let mut current_start = -1;
        let mut current_end = -1;
        let mut done = false;
        let mut block_start = 0u64;
        while block_start < inner.disk_count && !done {
            let block_len = (inner.disk_count - block_start).min(BLOCK_SIZE as u64) as usize;
            let pairs = inner.read_pairs(block_start, block_len)?;
            for (index_position, file_position) in pairs {
                if index_position > current_end {
                    match files.first_end_ge(index_position) {
                        Some(e) => {
                            current_start = e.start;
                            current_end = e.end;
                        }
                        None => {
                            done = true;
                            break;
                        }
                    }
                }
                if index_position >= current_start {
                    let mut pair = [0u8; PAIR_SIZE as usize];
                    pair[..8].copy_from_slice(&index_position.to_le_bytes());
                    pair[8..].copy_from_slice(&file_position.to_le_bytes());
                    temp.seek(SeekFrom::Start(pair_offset(kept)))?;
                    temp.write_all(&pair)?;
                    kept += 1;
                }
            }
            block_start += block_len as u64;
        }
        temp.seek(SeekFrom::Start(0))?;
        temp.write_all(&kept.to_le_bytes())?;
        temp.sync_all()?;
        drop(temp);

        if let Err(e) = std::fs::rename(&temp_path, &inner.path) {
            error!("replacing index-to-text map failed: {}", e);
            return Err(e.into());
        }
        let reopened = OpenOptions::new().read(true).write(true).open(&inner.path)?;
        inner.file = reopened;
        inner.reload()?;
        Ok(())
    }
}

impl MapInner {
    fn write_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.disk_count.to_le_bytes())?;
        Ok(())
    }

    fn write_pair(&mut self, ordinal: u64, index_position: Offset, file_position: i64) -> Result<()> {
        let mut pair = [0u8; PAIR_SIZE as usize];
        pair[..8].copy_from_slice(&index_position.to_le_bytes());
        pair[8..].copy_from_slice(&file_position.to_le_bytes());
        self.file.seek(SeekFrom::Start(pair_offset(ordinal)))?;
        self.file.write_all(&pair)?;
        Ok(())
    }

    fn read_pairs(&mut self, ordinal: u64, count: usize) -> Result<Vec<(Offset, i64)>> {
        let mut buf = vec![0u8; count * PAIR_SIZE as usize];
        self.file.seek(SeekFrom::Start(pair_offset(ordinal)))?;
        self.file.read_exact(&mut buf)?;
        let mut pairs = Vec::with_capacity(count);
        for i in 0..count {
            let base = i * PAIR_SIZE as usize;
            pairs.push((
                Offset::from_le_bytes(buf[base..base + 8].try_into().unwrap()),
                i64::from_le_bytes(buf[base + 8..base + 16].try_into().unwrap()),
            ));
        }
        Ok(pairs)
    }

    /// Rebuild count, last position, and the sparse directory from disk.
    fn reload(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        self.file.read_exact(&mut header)?;
        self.disk_count = u64::from_le_bytes(header);
        self.last_index_position = -1;
        self.sparse = Vec::new();

        let mut ordinal = 0u64;
        while ordinal < self.disk_count {
            let len = (self.disk_count - ordinal).min(BLOCK_SIZE as u64) as usize;
            let pairs = self.read_pairs(ordinal, len)?;
            for (i, (index_position, _)) in pairs.into_iter().enumerate() {
                let n = ordinal + i as u64;
                if index_position <= self.last_index_position {
                    return Err(QuarryError::Protocol(
                        "index-to-text map is not sorted".into(),
                    ));
                }
                if n % INDEX_GRANULARITY == 0 {
                    self.sparse.push(SparseEntry {
                        position_in_map: n,
                        index_position,
                        chunk_size: 0,
                    });
                }
                self.sparse.last_mut().expect("chunk exists").chunk_size += 1;
                self.last_index_position = index_position;
            }
            ordinal += len as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_lookup() {
        let dir = TempDir::new().unwrap();
        let map = IndexToText::create(&dir.path().join("index.map")).unwrap();
        for i in 0..100 {
            map.append(i * 10, i * 997).unwrap();
        }
        assert_eq!(map.len(), 100);
        assert_eq!(map.last_smaller_eq(0).unwrap(), Some((0, 0)));
        assert_eq!(map.last_smaller_eq(55).unwrap(), Some((50, 5 * 997)));
        assert_eq!(map.last_smaller_eq(990).unwrap(), Some((990, 99 * 997)));
        assert_eq!(map.last_smaller_eq(5000).unwrap(), Some((990, 99 * 997)));
        assert_eq!(map.last_smaller_eq(-1).unwrap(), None);
    }

    #[test]
    fn test_monotonicity_enforced() {
        let dir = TempDir::new().unwrap();
        let map = IndexToText::create(&dir.path().join("index.map")).unwrap();
        map.append(100, 0).unwrap();
        assert!(map.append(100, 1).is_err());
        assert!(map.append(50, 1).is_err());
        map.append(101, 1).unwrap();
    }

    #[test]
    fn test_reopen_rebuilds_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.map");
        {
            let map = IndexToText::create(&path).unwrap();
            for i in 0..5000 {
                map.append(i * 3, i).unwrap();
            }
        }
        let map = IndexToText::open(&path).unwrap();
        assert_eq!(map.len(), 5000);
        assert_eq!(map.last_smaller_eq(31).unwrap(), Some((30, 10)));
        assert_eq!(map.last_smaller_eq(14_997).unwrap(), Some((14_997, 4999)));
        map.append(20_000, 1234).unwrap();
        assert_eq!(map.last_smaller_eq(30_000).unwrap(), Some((20_000, 1234)));
    }

    #[test]
    fn test_filter_keeps_only_visible_ranges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.map");
        let map = IndexToText::create(&path).unwrap();
        for i in 0..1000 {
            map.append(i, i * 2).unwrap();
        }

        let mut files = ExtentList::vector(vec![
            Extent::new(100, 199),
            Extent::new(500, 599),
        ]);
        map.filter(&mut files).unwrap();

        assert_eq!(map.len(), 200);
        assert_eq!(map.last_smaller_eq(50).unwrap(), None);
        assert_eq!(map.last_smaller_eq(150).unwrap(), Some((150, 300)));
        // Positions in the gap resolve to the end of the first range.
        assert_eq!(map.last_smaller_eq(300).unwrap(), Some((199, 398)));
        assert_eq!(map.last_smaller_eq(10_000).unwrap(), Some((599, 1198)));

        // The filtered map survives reopening.
        drop(map);
        let map = IndexToText::open(&path).unwrap();
        assert_eq!(map.len(), 200);
        assert_eq!(map.last_smaller_eq(550).unwrap(), Some((550, 1100)));
    }
}
