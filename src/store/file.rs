/// A byte-stream view of one file inside the store: seek, read, write.
/// Writes extend the page chain with pages claimed close to the current
/// tail; the tail entry of the page-layout table tracks how many bytes of
/// the last page are in use.
use std::sync::Arc;

use crate::error::{QuarryError, Result};
use crate::store::{FileNo, FileStore, PageNo, UNUSED_PAGE};

pub struct StoreFile {
    store: Arc<FileStore>,
    handle: FileNo,
    pages: Vec<PageNo>,
    size: i64,
    seek_pos: i64,
    page_size: i64,
}

impl StoreFile {
    /// Create a fresh zero-length file.
    pub fn create(store: Arc<FileStore>) -> Result<StoreFile> {
        let handle = store.create_file(None)?;
        StoreFile::open(store, handle)
    }

    /// Open an existing file by handle.
    pub fn open(store: Arc<FileStore>, handle: FileNo) -> Result<StoreFile> {
        let first = store.first_page(handle)?;
        if first == UNUSED_PAGE || first < 0 {
            return Err(QuarryError::NotFound(format!("no file {}", handle)));
        }
        let page_size = store.page_size() as i64;
        let mut pages = vec![first];
        let last_len: i64;
        let mut page = first;
        loop {
            let status = store.page_status(page)?;
            if status > 0 {
                pages.push(status);
                page = status;
            } else {
                last_len = (-status) as i64;
                break;
            }
        }
        let size = (pages.len() as i64 - 1) * page_size + last_len;
        Ok(StoreFile {
            store,
            handle,
            pages,
            size,
            seek_pos: 0,
            page_size,
        })
    }

    pub fn handle(&self) -> FileNo {
        self.handle
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn seek_pos(&self) -> i64 {
        self.seek_pos
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn seek(&mut self, position: i64) -> Result<()> {
        if position < 0 || position > self.size {
            return Err(QuarryError::Protocol(format!(
                "seek to {} outside file of {} bytes",
                position, self.size
            )));
        }
        self.seek_pos = position;
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the seek position; returns the
    /// number of bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() && self.seek_pos < self.size {
            let page_idx = (self.seek_pos / self.page_size) as usize;
            let offset = self.seek_pos % self.page_size;
            let chunk = (self.page_size - offset)
                .min((buf.len() - done) as i64)
                .min(self.size - self.seek_pos) as usize;
            self.store.read_page(
                self.pages[page_idx],
                offset as i32,
                &mut buf[done..done + chunk],
            )?;
            done += chunk;
            self.seek_pos += chunk as i64;
        }
        Ok(done)
    }

    /// Seek and read as one call.
    pub fn read_at(&mut self, position: i64, buf: &mut [u8]) -> Result<usize> {
        self.seek(position)?;
        self.read(buf)
    }

    /// Write all of `data` at the seek position, extending the file as
    /// needed.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let end_pos = self.seek_pos + data.len() as i64;

        // Grow the chain first so a failed claim leaves the file intact.
        while (self.pages.len() as i64) * self.page_size < end_pos {
            let last = *self.pages.last().expect("file has at least one page");
            let new_page = self.store.claim_free_page(self.handle, last)?;
            self.store.set_page_status(last, new_page)?;
            self.store.set_page_status(new_page, 0)?;
            self.pages.push(new_page);
            self.store
                .set_file_page_count(self.handle, self.pages.len() as PageNo)?;
        }

        let mut done = 0;
        while done < data.len() {
            let page_idx = (self.seek_pos / self.page_size) as usize;
            let offset = self.seek_pos % self.page_size;
            let chunk = (self.page_size - offset).min((data.len() - done) as i64) as usize;
            self.store.write_page(
                self.pages[page_idx],
                offset as i32,
                &data[done..done + chunk],
            )?;
            done += chunk;
            self.seek_pos += chunk as i64;
        }

        if end_pos > self.size {
            self.size = end_pos;
            let last = *self.pages.last().expect("file has at least one page");
            let last_len = self.size - (self.pages.len() as i64 - 1) * self.page_size;
            self.store.set_page_status(last, -(last_len as i32))?;
        }
        Ok(())
    }

    /// Seek and write as one call.
    pub fn write_at(&mut self, position: i64, data: &[u8]) -> Result<()> {
        self.seek(position)?;
        self.write(data)
    }

    /// Remove the file from the store.
    pub fn delete(self) -> Result<()> {
        self.store.delete_file(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (Arc<FileStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("files.store");
        let store = Arc::new(FileStore::create(&path, 512, 128, 16 * 1024).unwrap());
        (store, dir)
    }

    #[test]
    fn test_write_then_read_back() {
        let (store, _dir) = setup();
        let mut file = StoreFile::create(store.clone()).unwrap();

        let data: Vec<u8> = (0..1500).map(|i| (i % 251) as u8).collect();
        file.write(&data).unwrap();
        assert_eq!(file.size(), 1500);
        assert_eq!(file.page_count(), 3); // ceil(1500 / 512)

        let mut buf = vec![0u8; 1500];
        let read = file.read_at(0, &mut buf).unwrap();
        assert_eq!(read, 1500);
        assert_eq!(buf, data);
    }

    #[test]
    fn test_read_stops_at_end() {
        let (store, _dir) = setup();
        let mut file = StoreFile::create(store.clone()).unwrap();
        file.write(b"short").unwrap();

        let mut buf = [0u8; 64];
        let read = file.read_at(0, &mut buf).unwrap();
        assert_eq!(read, 5);
        assert_eq!(&buf[..5], b"short");
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_overwrite_in_place() {
        let (store, _dir) = setup();
        let mut file = StoreFile::create(store.clone()).unwrap();
        file.write(&[0xAAu8; 1000]).unwrap();
        file.write_at(600, &[0xBBu8; 100]).unwrap();
        assert_eq!(file.size(), 1000);

        let mut buf = vec![0u8; 1000];
        file.read_at(0, &mut buf).unwrap();
        assert!(buf[..600].iter().all(|&b| b == 0xAA));
        assert!(buf[600..700].iter().all(|&b| b == 0xBB));
        assert!(buf[700..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_reopen_by_handle() {
        let (store, _dir) = setup();
        let handle;
        {
            let mut file = StoreFile::create(store.clone()).unwrap();
            handle = file.handle();
            file.write(&[7u8; 700]).unwrap();
        }
        let mut file = StoreFile::open(store.clone(), handle).unwrap();
        assert_eq!(file.size(), 700);
        assert_eq!(file.page_count(), 2);
        let mut buf = [0u8; 700];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 700);
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_seek_bounds() {
        let (store, _dir) = setup();
        let mut file = StoreFile::create(store.clone()).unwrap();
        file.write(b"0123456789").unwrap();
        assert!(file.seek(10).is_ok());
        assert!(file.seek(11).is_err());
        assert!(file.seek(-1).is_err());
    }

    #[test]
    fn test_delete_releases_pages() {
        let (store, _dir) = setup();
        let used_before = store.used_page_count();
        let mut file = StoreFile::create(store.clone()).unwrap();
        file.write(&[1u8; 3000]).unwrap();
        assert!(store.used_page_count() > used_before);
        file.delete().unwrap();
        assert_eq!(store.used_page_count(), used_before);
    }

    #[test]
    fn test_three_file_scenario() {
        let (store, _dir) = setup();
        let f1 = StoreFile::create(store.clone()).unwrap();
        let mut f2 = StoreFile::create(store.clone()).unwrap();
        let mut f3 = StoreFile::create(store.clone()).unwrap();

        let payload: Vec<u8> = (0..1500).map(|i| (i * 7 % 256) as u8).collect();
        f2.write(&payload).unwrap();
        f1.delete().unwrap();
        f3.write(&vec![0x5Au8; 3000]).unwrap();

        let mut buf = vec![0u8; 1500];
        f2.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, payload);
        assert_eq!(f3.page_count(), 6); // ceil(3000 / 512)
    }
}
