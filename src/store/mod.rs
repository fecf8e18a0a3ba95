/// Paged file store: many small files packed into one on-disk file.
///
/// Posting lists live in files of their own; an OS filesystem cannot
/// carry millions of them, so the store keeps fixed-size pages inside a
/// single data file. Three regions, in order: data pages, the page-layout
/// table (one i32 per data page: unused, next-page-in-chain, or -length
/// for the tail page), and the file-mapping table ((first_page,
/// page_count) per file id). The preamble lives at the start of page 0,
/// which is never handed out.
///
/// All public operations serialize through one internal lock; reads take
/// it too because a cache hit reorders the LRU queue.
pub mod cache;
pub mod file;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{CacheMode, Config};
use crate::error::{QuarryError, Result};
use crate::store::cache::PageCache;

pub use crate::store::file::StoreFile;

pub type PageNo = i32;
pub type FileNo = i32;

/// Page-layout entry of a page not owned by any file.
pub const UNUSED_PAGE: i32 = -123_456_789;

/// First 32 bits of every store file.
pub const FINGERPRINT: i32 = 912_837_123;

pub const MIN_PAGE_SIZE: u32 = 128;
pub const MAX_PAGE_SIZE: u32 = 8192;
pub const MIN_PAGE_COUNT: u32 = 32;
pub const MAX_PAGE_COUNT: u32 = 1 << 30;

/// Stores at or below this page count grow more aggressively.
const SMALL_STORE_THRESHOLD: i64 = 1024;

/// Fingerprint, page size, page count, layout-table pages, mapping-table
/// pages, cache-size hint.
const PREAMBLE_FIELDS: usize = 6;
const PREAMBLE_LENGTH: i32 = (PREAMBLE_FIELDS * 4) as i32;

pub const DEFAULT_CACHE_SIZE: u32 = 1024 * 1024;

const INT_SIZE: i32 = 4;

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub page_size: i32,
    pub page_count: i32,
    pub used_pages: i32,
    pub file_count: i32,
    pub total_bytes: u64,
    pub cached_reads: u64,
    pub uncached_reads: u64,
    pub cached_writes: u64,
    pub uncached_writes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub file_no: FileNo,
    pub first_page: PageNo,
    pub page_count: PageNo,
}

pub struct FileStore {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    file: File,
    page_size: i32,
    ints_per_page: i32,
    double_ints_per_page: i32,
    page_count: i32,
    page_layout_size: i32,
    file_mapping_size: i32,
    /// Free layout entries per layout-table page.
    free_pages: Vec<i16>,
    /// Free file slots per mapping-table page.
    free_file_numbers: Vec<i16>,
    cache: Option<PageCache>,
    cache_size: i32,
    cache_mode: CacheMode,
    cached_reads: u64,
    uncached_reads: u64,
    cached_writes: u64,
    uncached_writes: u64,
}

impl FileStore {
    /// Create a new store. `page_count` must be a multiple of the layout
    /// granularity `page_size / 4`.
    pub fn create(path: &Path, page_size: u32, page_count: u32, cache_size: u32) -> Result<FileStore> {
        Self::create_with_mode(path, page_size, page_count, cache_size, CacheMode::Lru)
    }

    pub fn create_with_mode(
        path: &Path,
        page_size: u32,
        page_count: u32,
        cache_size: u32,
        cache_mode: CacheMode,
    ) -> Result<FileStore> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
            || !(MIN_PAGE_COUNT..=MAX_PAGE_COUNT).contains(&page_count)
            || page_size % 4 != 0
            || page_count % (page_size / 4) != 0
        {
            return Err(QuarryError::Config(format!(
                "illegal page geometry: {} pages of {} bytes",
                page_count, page_size
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let page_size = page_size as i32;
        let page_count = page_count as i32;
        let ints_per_page = page_size / INT_SIZE;
        let page_layout_size = page_count / ints_per_page;
        let file_mapping_size = 1;

        let mut inner = StoreInner {
            file,
            page_size,
            ints_per_page,
            double_ints_per_page: ints_per_page / 2,
            page_count,
            page_layout_size,
            file_mapping_size,
            free_pages: Vec::new(),
            free_file_numbers: Vec::new(),
            cache: None,
            cache_size: cache_size as i32,
            cache_mode,
            cached_reads: 0,
            uncached_reads: 0,
            cached_writes: 0,
            uncached_writes: 0,
        };

        let total = inner.total_pages() as u64 * page_size as u64;
        inner.file.set_len(total)?;
        inner.write_preamble()?;

        // Mark every layout entry unused, every file slot free.
        let unused_page = unused_page_buffer(page_size as usize);
        for i in 0..page_layout_size + file_mapping_size {
            inner.write_direct(page_count + i, 0, &unused_page)?;
        }
        inner.initialize_free_space_arrays()?;
        // Page 0 carries the preamble and is never part of a file.
        inner.set_page_status(0, -PREAMBLE_LENGTH)?;
        inner.enable_caching();

        Ok(FileStore {
            inner: Mutex::new(inner),
        })
    }

    /// Create a store with the geometry and cache settings of a
    /// validated configuration.
    pub fn create_from_config(path: &Path, config: &Config) -> Result<FileStore> {
        config.validate()?;
        Self::create_with_mode(
            path,
            config.page_size,
            config.page_count,
            config.cache_size,
            config.cache_mode,
        )
    }

    /// Open an existing store, verifying its fingerprint and geometry.
    pub fn open(path: &Path) -> Result<FileStore> {
        Self::open_with_mode(path, CacheMode::Lru)
    }

    pub fn open_with_mode(path: &Path, cache_mode: CacheMode) -> Result<FileStore> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut preamble = [0u8; PREAMBLE_LENGTH as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut preamble)?;
        let field = |i: usize| i32::from_le_bytes(preamble[i * 4..i * 4 + 4].try_into().unwrap());
        let fingerprint = field(0);
        let page_size = field(1);
        let page_count = field(2);
        let page_layout_size = field(3);
        let file_mapping_size = field(4);
        let cache_size = field(5);

        if fingerprint != FINGERPRINT {
            return Err(QuarryError::Protocol(format!(
                "bad store fingerprint: {:#x}",
                fingerprint
            )));
        }
        if page_size < MIN_PAGE_SIZE as i32
            || page_size > MAX_PAGE_SIZE as i32
            || page_count < MIN_PAGE_COUNT as i32
        {
            return Err(QuarryError::Protocol("bad store geometry".into()));
        }

        let mut inner = StoreInner {
            file,
            page_size,
            ints_per_page: page_size / INT_SIZE,
            double_ints_per_page: page_size / INT_SIZE / 2,
            page_count,
            page_layout_size,
            file_mapping_size,
            free_pages: Vec::new(),
            free_file_numbers: Vec::new(),
            cache: None,
            cache_size,
            cache_mode,
            cached_reads: 0,
            uncached_reads: 0,
            cached_writes: 0,
            uncached_writes: 0,
        };

        if inner.page_status(0)? != -PREAMBLE_LENGTH {
            return Err(QuarryError::Protocol("page 0 is not the preamble page".into()));
        }
        inner.initialize_free_space_arrays()?;
        inner.enable_caching();

        Ok(FileStore {
            inner: Mutex::new(inner),
        })
    }

    pub fn page_size(&self) -> i32 {
        self.inner.lock().page_size
    }

    pub fn page_count(&self) -> i32 {
        self.inner.lock().page_count
    }

    pub fn used_page_count(&self) -> i32 {
        self.inner.lock().used_page_count()
    }

    pub fn file_count(&self) -> i32 {
        let inner = self.inner.lock();
        (0..inner.file_mapping_size)
            .map(|j| inner.double_ints_per_page - inner.free_file_numbers[j as usize] as i32)
            .sum()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            page_size: inner.page_size,
            page_count: inner.page_count,
            used_pages: inner.used_page_count(),
            file_count: (0..inner.file_mapping_size)
                .map(|j| inner.double_ints_per_page - inner.free_file_numbers[j as usize] as i32)
                .sum(),
            total_bytes: inner.total_pages() as u64 * inner.page_size as u64,
            cached_reads: inner.cached_reads,
            uncached_reads: inner.uncached_reads,
            cached_writes: inner.cached_writes,
            uncached_writes: inner.uncached_writes,
        }
    }

    /// All existing files with their first page and page count.
    pub fn file_page_mapping(&self) -> Result<Vec<FileEntry>> {
        let mut inner = self.inner.lock();
        let mut entries = Vec::new();
        for file_no in 0..inner.file_mapping_size * inner.double_ints_per_page {
            let first_page = inner.first_page(file_no)?;
            if first_page != UNUSED_PAGE && first_page >= 0 {
                entries.push(FileEntry {
                    file_no,
                    first_page,
                    page_count: inner.file_page_count(file_no)?,
                });
            }
        }
        Ok(entries)
    }

    /// Page chain of one file, in order.
    pub fn file_chain(&self, file_no: FileNo) -> Result<Vec<PageNo>> {
        let mut inner = self.inner.lock();
        inner.chain_of(file_no)
    }

    pub fn create_file(&self, requested: Option<FileNo>) -> Result<FileNo> {
        let mut inner = self.inner.lock();
        inner.create_file(requested)
    }

    pub fn delete_file(&self, file_no: FileNo) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.delete_file(file_no)
    }

    /// Read `buf.len()` bytes from a page, starting at `offset`.
    pub fn read_page(&self, page: PageNo, offset: i32, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.read_page(page, offset, buf)
    }

    /// Write bytes into a page, starting at `offset`.
    pub fn write_page(&self, page: PageNo, offset: i32, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.write_page(page, offset, data)
    }

    /// Hand out a free page near `close_to`, growing the store if none is
    /// left. The page is marked used before the lock drops.
    pub fn claim_free_page(&self, owner: FileNo, close_to: PageNo) -> Result<PageNo> {
        let mut inner = self.inner.lock();
        inner.claim_free_page(owner, close_to)
    }

    pub fn resize(&self, new_page_count: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.resize(new_page_count)
    }

    pub fn defrag(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.defrag()
    }

    /// Write all pending cache changes to disk.
    pub fn flush_cache(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.flush_cache()
    }

    /// Flush and fsync.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.flush_cache()?;
        inner.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn page_status(&self, page: PageNo) -> Result<i32> {
        let mut inner = self.inner.lock();
        inner.page_status(page)
    }

    pub(crate) fn set_page_status(&self, page: PageNo, status: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.set_page_status(page, status)
    }

    pub(crate) fn first_page(&self, file_no: FileNo) -> Result<PageNo> {
        let mut inner = self.inner.lock();
        inner.first_page(file_no)
    }

    pub(crate) fn set_file_page_count(&self, file_no: FileNo, count: PageNo) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.set_file_page_count(file_no, count)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.flush_cache() {
            warn!("flush on close failed: {}", e);
        }
    }
}

fn unused_page_buffer(page_size: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(page_size);
    for _ in 0..page_size / 4 {
        buf.extend_from_slice(&UNUSED_PAGE.to_le_bytes());
    }
    buf
}

impl StoreInner {
    fn total_pages(&self) -> i32 {
        self.page_count + self.page_layout_size + self.file_mapping_size
    }

    fn used_page_count(&self) -> i32 {
        (0..self.page_layout_size)
            .map(|j| self.ints_per_page - self.free_pages[j as usize] as i32)
            .sum()
    }

    fn write_preamble(&mut self) -> Result<()> {
        let fields = [
            FINGERPRINT,
            self.page_size,
            self.page_count,
            self.page_layout_size,
            self.file_mapping_size,
            self.cache_size,
        ];
        let mut buf = [0u8; PREAMBLE_LENGTH as usize];
        for (i, v) in fields.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn write_preamble_field(&mut self, index: usize, value: i32) -> Result<()> {
        self.file.seek(SeekFrom::Start(index as u64 * 4))?;
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn enable_caching(&mut self) {
        if self.cache.is_none() {
            let capacity = (self.cache_size / self.page_size) as usize;
            if capacity > 0 {
                self.cache = Some(PageCache::new(
                    self.page_size as usize,
                    capacity,
                    self.cache_mode,
                ));
            }
        }
    }

    /// Flush and drop the cache; used around structural changes.
    fn disable_caching(&mut self) -> Result<()> {
        self.flush_cache()?;
        self.cache = None;
        Ok(())
    }

    fn flush_cache(&mut self) -> Result<()> {
        if let Some(mut cache) = self.cache.take() {
            for (page, data) in cache.drain_dirty() {
                self.write_direct(page, 0, &data)?;
            }
            self.cache = Some(cache);
        }
        Ok(())
    }

    // ── raw page I/O ──

    fn check_page(&self, page: PageNo, offset: i32, len: usize) -> Result<()> {
        if page < 0 || page >= self.total_pages() {
            return Err(QuarryError::Protocol(format!(
                "page {} out of range (total {})",
                page,
                self.total_pages()
            )));
        }
        if offset < 0 || offset as usize + len > self.page_size as usize {
            return Err(QuarryError::Protocol(format!(
                "access beyond page boundary: offset {} len {}",
                offset, len
            )));
        }
        Ok(())
    }

    fn read_direct(&mut self, page: PageNo, offset: i32, buf: &mut [u8]) -> Result<()> {
        self.check_page(page, offset, buf.len())?;
        self.uncached_reads += 1;
        let pos = page as u64 * self.page_size as u64 + offset as u64;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_direct(&mut self, page: PageNo, offset: i32, data: &[u8]) -> Result<()> {
        self.check_page(page, offset, data.len())?;
        self.uncached_writes += 1;
        let pos = page as u64 * self.page_size as u64 + offset as u64;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn cache_insert(&mut self, page: PageNo, data: Vec<u8>, dirty: bool) -> Result<()> {
        if let Some(cache) = self.cache.as_mut() {
            if let Some((victim, old)) = cache.insert(page, data, dirty) {
                self.write_direct(victim, 0, &old)?;
            }
        }
        Ok(())
    }

    fn read_page(&mut self, page: PageNo, offset: i32, buf: &mut [u8]) -> Result<()> {
        self.check_page(page, offset, buf.len())?;
        self.cached_reads += 1;
        if self.cache.is_none() {
            return self.read_direct(page, offset, buf);
        }
        if let Some(cache) = self.cache.as_mut() {
            if cache.read(page, offset as usize, buf) {
                return Ok(());
            }
        }
        // Miss: serve from a direct read, prefetch up to 3 following
        // pages, and cache the requested page last so a small cache
        // cannot evict it before a re-probe.
        let mut data = vec![0u8; self.page_size as usize];
        self.read_direct(page, 0, &mut data)?;
        buf.copy_from_slice(&data[offset as usize..offset as usize + buf.len()]);
        let total = self.total_pages();
        for p in page + 1..(page + 4).min(total) {
            if self.cache.as_ref().map_or(true, |c| c.contains(p)) {
                continue;
            }
            let mut ahead = vec![0u8; self.page_size as usize];
            self.read_direct(p, 0, &mut ahead)?;
            self.cache_insert(p, ahead, false)?;
        }
        self.cache_insert(page, data, false)?;
        Ok(())
    }

    fn write_page(&mut self, page: PageNo, offset: i32, data: &[u8]) -> Result<()> {
        self.check_page(page, offset, data.len())?;
        self.cached_writes += 1;
        if self.cache.is_none() {
            return self.write_direct(page, offset, data);
        }
        if offset == 0 && data.len() == self.page_size as usize {
            // Full-page writes bypass the cache.
            self.write_direct(page, 0, data)?;
            if let Some(cache) = self.cache.as_mut() {
                cache.refresh(page, data);
            }
            return Ok(());
        }
        if let Some(cache) = self.cache.as_mut() {
            if cache.write(page, offset as usize, data) {
                return Ok(());
            }
        }
        // Partial write to an uncached page: read-modify-write through
        // the cache.
        let mut full = vec![0u8; self.page_size as usize];
        self.read_direct(page, 0, &mut full)?;
        full[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        self.cache_insert(page, full, true)
    }

    fn read_i32(&mut self, page: PageNo, offset: i32) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_page(page, offset, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn write_i32(&mut self, page: PageNo, offset: i32, value: i32) -> Result<()> {
        self.write_page(page, offset, &value.to_le_bytes())
    }

    // ── page layout table ──

    fn page_status(&mut self, page: PageNo) -> Result<i32> {
        if page < 0 || page >= self.page_count {
            return Err(QuarryError::Protocol(format!(
                "layout query for page {} out of range",
                page
            )));
        }
        let table_page = self.page_count + page / self.ints_per_page;
        let offset = (page % self.ints_per_page) * INT_SIZE;
        self.read_i32(table_page, offset)
    }

    fn set_page_status(&mut self, page: PageNo, status: i32) -> Result<()> {
        if page < 0 || page >= self.page_count {
            return Err(QuarryError::Protocol(format!(
                "layout update for page {} out of range",
                page
            )));
        }
        let bucket = (page / self.ints_per_page) as usize;
        let table_page = self.page_count + page / self.ints_per_page;
        let offset = (page % self.ints_per_page) * INT_SIZE;
        let old = self.read_i32(table_page, offset)?;
        self.write_i32(table_page, offset, status)?;
        if old != status && !self.free_pages.is_empty() {
            if status == UNUSED_PAGE {
                self.free_pages[bucket] += 1;
            }
            if old == UNUSED_PAGE {
                self.free_pages[bucket] -= 1;
            }
        }
        Ok(())
    }

    // ── file mapping table ──

    fn file_slot(&self, file_no: FileNo) -> Result<(PageNo, i32)> {
        if file_no < 0 || file_no >= self.file_mapping_size * self.double_ints_per_page {
            return Err(QuarryError::Protocol(format!(
                "file number {} out of range",
                file_no
            )));
        }
        let table_page =
            self.page_count + self.page_layout_size + file_no / self.double_ints_per_page;
        let offset = (file_no % self.double_ints_per_page) * 2 * INT_SIZE;
        Ok((table_page, offset))
    }

    fn first_page(&mut self, file_no: FileNo) -> Result<PageNo> {
        let (page, offset) = self.file_slot(file_no)?;
        self.read_i32(page, offset)
    }

    fn set_first_page(&mut self, file_no: FileNo, first_page: PageNo) -> Result<()> {
        let (page, offset) = self.file_slot(file_no)?;
        let bucket = (file_no / self.double_ints_per_page) as usize;
        let old = self.read_i32(page, offset)?;
        self.write_i32(page, offset, first_page)?;
        if old != first_page && !self.free_file_numbers.is_empty() {
            if first_page == UNUSED_PAGE {
                self.free_file_numbers[bucket] += 1;
            }
            if old == UNUSED_PAGE {
                self.free_file_numbers[bucket] -= 1;
            }
        }
        Ok(())
    }

    fn file_page_count(&mut self, file_no: FileNo) -> Result<PageNo> {
        let (page, offset) = self.file_slot(file_no)?;
        self.read_i32(page, offset + INT_SIZE)
    }

    fn set_file_page_count(&mut self, file_no: FileNo, count: PageNo) -> Result<()> {
        let (page, offset) = self.file_slot(file_no)?;
        self.write_i32(page, offset + INT_SIZE, count)
    }

    fn initialize_free_space_arrays(&mut self) -> Result<()> {
        let mut free_pages = Vec::with_capacity(self.page_layout_size as usize);
        let mut buf = vec![0u8; self.page_size as usize];
        for j in 0..self.page_layout_size {
            self.read_page(self.page_count + j, 0, &mut buf)?;
            let mut free = 0i16;
            for k in 0..self.ints_per_page as usize {
                if i32::from_le_bytes(buf[k * 4..k * 4 + 4].try_into().unwrap()) == UNUSED_PAGE {
                    free += 1;
                }
            }
            free_pages.push(free);
        }

        let mut free_file_numbers = Vec::with_capacity(self.file_mapping_size as usize);
        for j in 0..self.file_mapping_size {
            self.read_page(self.page_count + self.page_layout_size + j, 0, &mut buf)?;
            let mut free = 0i16;
            for k in 0..self.double_ints_per_page as usize {
                if i32::from_le_bytes(buf[k * 8..k * 8 + 4].try_into().unwrap()) == UNUSED_PAGE {
                    free += 1;
                }
            }
            free_file_numbers.push(free);
        }

        self.free_pages = free_pages;
        self.free_file_numbers = free_file_numbers;
        Ok(())
    }

    // ── allocation ──

    /// Scan one layout-table page for an unused entry.
    fn scan_bucket(&mut self, bucket: i32, from_entry: i32, upward: bool) -> Result<Option<PageNo>> {
        let mut buf = vec![0u8; self.page_size as usize];
        self.read_page(self.page_count + bucket, 0, &mut buf)?;
        let entry_at = |k: i32| {
            i32::from_le_bytes(
                buf[k as usize * 4..k as usize * 4 + 4].try_into().unwrap(),
            )
        };
        if upward {
            for k in from_entry..self.ints_per_page {
                if entry_at(k) == UNUSED_PAGE {
                    return Ok(Some(bucket * self.ints_per_page + k));
                }
            }
        } else {
            for k in (0..=from_entry.min(self.ints_per_page - 1)).rev() {
                if entry_at(k) == UNUSED_PAGE {
                    return Ok(Some(bucket * self.ints_per_page + k));
                }
            }
        }
        Ok(None)
    }

    fn claim_free_page(&mut self, owner: FileNo, close_to: PageNo) -> Result<PageNo> {
        let (orig_close_to, close_bucket) = if close_to < 0 || close_to >= self.page_count {
            (0, 0)
        } else {
            (close_to, close_to / self.ints_per_page)
        };

        let mut found = None;
        if self.free_pages[close_bucket as usize] > 0 {
            let from = orig_close_to % self.ints_per_page;
            found = self.scan_bucket(close_bucket, from, true)?;
            if found.is_none() {
                found = self.scan_bucket(close_bucket, from, false)?;
            }
        }
        if found.is_none() {
            for j in close_bucket + 1..self.page_layout_size {
                if self.free_pages[j as usize] > 0 {
                    found = self.scan_bucket(j, 0, true)?;
                    if found.is_some() {
                        break;
                    }
                }
            }
        }
        if found.is_none() {
            for j in (0..close_bucket).rev() {
                if self.free_pages[j as usize] > 0 {
                    found = self.scan_bucket(j, 0, true)?;
                    if found.is_some() {
                        break;
                    }
                }
            }
        }

        if let Some(page) = found {
            self.set_page_status(page, 0)?;
            return Ok(page);
        }

        // No free page anywhere: grow the store geometrically.
        if self.page_count >= MAX_PAGE_COUNT as i32 {
            return Err(QuarryError::ResourceExhausted(format!(
                "store is full at {} pages",
                self.page_count
            )));
        }
        let old_page_count = self.page_count;
        let factor = if (old_page_count as i64) <= SMALL_STORE_THRESHOLD {
            1.41 * 1.41
        } else {
            1.41
        };
        let mut new_page_count = (factor * old_page_count as f64) as i64;
        while new_page_count % self.ints_per_page as i64 != 0 {
            new_page_count += 1;
        }
        let new_page_count = new_page_count.min(MAX_PAGE_COUNT as i64) as i32;
        debug!(
            "growing store from {} to {} pages",
            old_page_count, new_page_count
        );
        self.resize(new_page_count)?;
        self.claim_free_page(owner, old_page_count)
    }

    fn claim_free_file_number(&mut self) -> Result<FileNo> {
        loop {
            let mut buf = vec![0u8; self.page_size as usize];
            for j in 0..self.file_mapping_size {
                if self.free_file_numbers[j as usize] > 0 {
                    self.read_page(self.page_count + self.page_layout_size + j, 0, &mut buf)?;
                    for k in 0..self.double_ints_per_page {
                        let first = i32::from_le_bytes(
                            buf[k as usize * 8..k as usize * 8 + 4].try_into().unwrap(),
                        );
                        if first == UNUSED_PAGE {
                            return Ok(j * self.double_ints_per_page + k);
                        }
                    }
                }
            }
            self.increase_file_mapping_size()?;
        }
    }

    fn increase_file_mapping_size(&mut self) -> Result<()> {
        self.disable_caching()?;

        let total = (self.total_pages() + 1) as u64 * self.page_size as u64;
        self.file.set_len(total)?;
        self.file_mapping_size += 1;
        self.write_preamble_field(4, self.file_mapping_size)?;

        // Blank out the new table page, then recount.
        let unused_page = unused_page_buffer(self.page_size as usize);
        let new_table_page = self.page_count + self.page_layout_size + self.file_mapping_size - 1;
        self.write_direct(new_table_page, 0, &unused_page)?;
        self.initialize_free_space_arrays()?;
        self.enable_caching();
        Ok(())
    }

    fn decrease_file_mapping_size(&mut self) -> Result<()> {
        if self.free_file_numbers[self.file_mapping_size as usize - 1]
            != self.double_ints_per_page as i16
        {
            return Ok(());
        }
        self.disable_caching()?;
        self.file_mapping_size -= 1;
        self.write_preamble_field(4, self.file_mapping_size)?;
        let total = self.total_pages() as u64 * self.page_size as u64;
        self.file.set_len(total)?;
        self.initialize_free_space_arrays()?;
        self.enable_caching();
        Ok(())
    }

    // ── files ──

    fn create_file(&mut self, requested: Option<FileNo>) -> Result<FileNo> {
        let first_page = self.claim_free_page(-1, -1)?;

        let file_no = match requested {
            Some(f) if f >= 0 => {
                while f >= self.double_ints_per_page * self.file_mapping_size {
                    self.increase_file_mapping_size()?;
                }
                if self.first_page(f)? != UNUSED_PAGE {
                    self.set_page_status(first_page, UNUSED_PAGE)?;
                    return Err(QuarryError::Protocol(format!(
                        "file {} already exists",
                        f
                    )));
                }
                f
            }
            _ => self.claim_free_file_number()?,
        };

        self.set_first_page(file_no, first_page)?;
        self.set_file_page_count(file_no, 1)?;
        Ok(file_no)
    }

    fn delete_file(&mut self, file_no: FileNo) -> Result<()> {
        let first_page = self.first_page(file_no)?;
        if first_page == UNUSED_PAGE || first_page < 0 {
            return Err(QuarryError::NotFound(format!("no file {}", file_no)));
        }

        self.set_first_page(file_no, UNUSED_PAGE)?;
        self.set_file_page_count(file_no, UNUSED_PAGE)?;

        let mut page = first_page;
        while page > 0 {
            let next = self.page_status(page)?;
            self.set_page_status(page, UNUSED_PAGE)?;
            page = next;
        }

        // Shrink the file table if its last two pages hold nothing.
        let m = self.file_mapping_size as usize;
        if m >= 2
            && self.free_file_numbers[m - 1] == self.double_ints_per_page as i16
            && self.free_file_numbers[m - 2] == self.double_ints_per_page as i16
        {
            self.decrease_file_mapping_size()?;
        }
        Ok(())
    }

    fn chain_of(&mut self, file_no: FileNo) -> Result<Vec<PageNo>> {
        let first_page = self.first_page(file_no)?;
        if first_page == UNUSED_PAGE || first_page < 0 {
            return Err(QuarryError::NotFound(format!("no file {}", file_no)));
        }
        let mut pages = vec![first_page];
        let mut page = first_page;
        loop {
            let status = self.page_status(page)?;
            if status <= 0 {
                break;
            }
            pages.push(status);
            page = status;
        }
        Ok(pages)
    }

    // ── structural changes ──

    fn resize(&mut self, new_page_count: i32) -> Result<()> {
        if new_page_count < MIN_PAGE_COUNT as i32
            || new_page_count > MAX_PAGE_COUNT as i32
            || new_page_count % self.ints_per_page != 0
        {
            return Err(QuarryError::Protocol(format!(
                "illegal page count {}",
                new_page_count
            )));
        }
        if new_page_count < self.used_page_count() {
            return Err(QuarryError::Protocol(
                "cannot shrink below the used page count".into(),
            ));
        }
        if new_page_count == self.page_count {
            return Ok(());
        }

        if new_page_count < self.page_count {
            // Pack used pages to the front, then pull the tables in.
            self.defrag()?;
            self.disable_caching()?;

            let old_page_count = self.page_count;
            let old_layout_size = self.page_layout_size;
            let new_layout_size = new_page_count / self.ints_per_page;

            let mut buf = vec![0u8; self.page_size as usize];
            for i in 0..new_layout_size {
                self.read_direct(old_page_count + i, 0, &mut buf)?;
                self.write_direct(new_page_count + i, 0, &buf)?;
            }
            for i in 0..self.file_mapping_size {
                self.read_direct(old_page_count + old_layout_size + i, 0, &mut buf)?;
                self.write_direct(new_page_count + new_layout_size + i, 0, &buf)?;
            }

            self.page_count = new_page_count;
            self.page_layout_size = new_layout_size;
            self.write_preamble_field(2, self.page_count)?;
            self.write_preamble_field(3, self.page_layout_size)?;

            let total = self.total_pages() as u64 * self.page_size as u64;
            self.file.set_len(total)?;
        } else {
            self.disable_caching()?;

            let old_page_count = self.page_count;
            let old_layout_size = self.page_layout_size;
            let new_layout_size = new_page_count / self.ints_per_page;

            self.page_count = new_page_count;
            self.page_layout_size = new_layout_size;
            let total = self.total_pages() as u64 * self.page_size as u64;
            self.file.set_len(total)?;
            self.write_preamble_field(2, self.page_count)?;
            self.write_preamble_field(3, self.page_layout_size)?;

            // Move the tables outward back-to-front so overlapping
            // regions cannot clobber unread pages.
            let mut buf = vec![0u8; self.page_size as usize];
            for i in (0..self.file_mapping_size).rev() {
                self.read_direct(old_page_count + old_layout_size + i, 0, &mut buf)?;
                self.write_direct(new_page_count + new_layout_size + i, 0, &buf)?;
            }
            for i in (0..old_layout_size).rev() {
                self.read_direct(old_page_count + i, 0, &mut buf)?;
                self.write_direct(new_page_count + i, 0, &buf)?;
            }
            let unused_page = unused_page_buffer(self.page_size as usize);
            for i in old_layout_size..new_layout_size {
                self.write_direct(new_page_count + i, 0, &unused_page)?;
            }
        }

        self.initialize_free_space_arrays()?;
        self.enable_caching();
        Ok(())
    }

    /// Renumber pages so every file chain is contiguous: a DFS over the
    /// file chains assigns ascending positions, free pages move to the
    /// end, and the permutation is applied in place by cycle-chasing
    /// swaps.
    fn defrag(&mut self) -> Result<()> {
        let page_count = self.page_count as usize;
        let mut new_position: Vec<i32> = vec![-1; page_count];
        new_position[0] = 0; // page 0 stays put
        let mut next_free: i32 = 1;

        let upper_file_limit = self.double_ints_per_page * self.file_mapping_size;
        for file_no in 0..upper_file_limit {
            let mut page = self.first_page(file_no)?;
            while page > 0 {
                debug_assert!(new_position[page as usize] < 0);
                new_position[page as usize] = next_free;
                next_free += 1;
                page = self.page_status(page)?;
            }
        }
        for page in 1..page_count {
            if self.page_status(page as i32)? == UNUSED_PAGE {
                new_position[page] = next_free;
                next_free += 1;
            }
        }
        if next_free != self.page_count {
            return Err(QuarryError::Protocol(
                "page layout table is inconsistent".into(),
            ));
        }

        // Rewrite the layout table under the permutation.
        let entries = (self.page_layout_size * self.ints_per_page) as usize;
        let mut old_layout: Vec<i32> = vec![UNUSED_PAGE; entries];
        let mut buf = vec![0u8; self.page_size as usize];
        for i in 0..self.page_layout_size {
            self.read_page(self.page_count + i, 0, &mut buf)?;
            for k in 0..self.ints_per_page as usize {
                old_layout[i as usize * self.ints_per_page as usize + k] =
                    i32::from_le_bytes(buf[k * 4..k * 4 + 4].try_into().unwrap());
            }
        }
        let mut new_layout: Vec<i32> = vec![UNUSED_PAGE; entries];
        for page in 0..page_count {
            let old = old_layout[page];
            new_layout[new_position[page] as usize] = if old <= 0 {
                old
            } else {
                new_position[old as usize]
            };
        }
        for i in 0..self.page_layout_size {
            for k in 0..self.ints_per_page as usize {
                let v = new_layout[i as usize * self.ints_per_page as usize + k];
                buf[k * 4..k * 4 + 4].copy_from_slice(&v.to_le_bytes());
            }
            self.write_page(self.page_count + i, 0, &buf)?;
        }

        // Redirect every file to its relocated first page.
        for file_no in 0..upper_file_limit {
            let page = self.first_page(file_no)?;
            if page >= 0 {
                self.set_first_page(file_no, new_position[page as usize])?;
            }
        }

        // Move page data into place, one swap cycle at a time.
        let mut buffer1 = vec![0u8; self.page_size as usize];
        let mut buffer2 = vec![0u8; self.page_size as usize];
        for page in 0..page_count {
            let mut current = page;
            while new_position[current] != current as i32 {
                let target = new_position[current] as usize;
                self.read_page(current as i32, 0, &mut buffer1)?;
                self.read_page(target as i32, 0, &mut buffer2)?;
                self.write_page(target as i32, 0, &buffer1)?;
                self.write_page(current as i32, 0, &buffer2)?;
                new_position[current] = new_position[target];
                new_position[target] = target as i32;
            }
        }

        self.flush_cache()?;
        self.initialize_free_space_arrays()?;
        Ok(())
    }
}
