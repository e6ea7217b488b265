//! Paged storage (C6): whole-page I/O against a single on-disk file.
//!
//! Everything above this layer addresses pages strictly by number; this is
//! the only module that knows how a page number maps to a byte offset.

use std::{
    fs::{File, OpenOptions},
    io::{self, prelude::*, SeekFrom},
    path::Path,
};

use crate::aligned::PageBuffer;
use crate::constants::{PageNumber, PAGE_SIZE};

/// A file backing a heap: every read/write moves exactly `PAGE_SIZE` bytes,
/// at a `PAGE_SIZE`-aligned offset.
#[derive(Debug)]
pub struct PagedStorage {
    file: File,
}

impl PagedStorage {
    /// Opens `path`, creating it if it doesn't exist. Buffered (not direct)
    /// I/O: nothing in this engine's spec requires `O_DIRECT`, and plain
    /// buffered reads/writes work regardless of what filesystem the path
    /// resolves to (including a tmpfs-backed temp directory in tests).
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<PagedStorage> {
        let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        Ok(PagedStorage { file })
    }

    fn offset_of(page_number: PageNumber) -> u64 {
        page_number as u64 * PAGE_SIZE as u64
    }

    /// Reads the page at `page_number` into a freshly allocated buffer.
    pub fn read_page(&mut self, page_number: PageNumber) -> io::Result<Box<PageBuffer>> {
        let mut buf = PageBuffer::new();
        self.file.seek(SeekFrom::Start(Self::offset_of(page_number)))?;
        self.file.read_exact(&mut buf[..])?;
        Ok(buf)
    }

    /// Overwrites the page at `page_number` with `buf`'s contents.
    pub fn write_page(&mut self, page_number: PageNumber, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(Self::offset_of(page_number)))?;
        self.file.write_all(&buf[..PAGE_SIZE])?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Appends a new page at end-of-file and returns its page number.
    /// End-of-file is always a `PAGE_SIZE` multiple, since every write goes
    /// through this layer.
    pub fn append_page(&mut self, buf: &[u8]) -> io::Result<PageNumber> {
        let end = self.file.seek(SeekFrom::End(0))?;
        let page_number = (end / PAGE_SIZE as u64) as PageNumber;
        self.file.write_all(&buf[..PAGE_SIZE])?;
        self.file.sync_data()?;
        Ok(page_number)
    }

    /// Number of whole pages currently in the file.
    pub fn page_count(&mut self) -> io::Result<u64> {
        let len = self.file.seek(SeekFrom::End(0))?;
        Ok(len / PAGE_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = PagedStorage::open(dir.path().join("heap.db")).unwrap();

        let mut write_buf = PageBuffer::new();
        write_buf[0] = 0xab;
        write_buf[PAGE_SIZE - 1] = 0xcd;

        let page_number = storage.append_page(&write_buf).unwrap();
        assert_eq!(page_number, 0);

        let read_buf = storage.read_page(page_number).unwrap();
        assert_eq!(read_buf[0], 0xab);
        assert_eq!(read_buf[PAGE_SIZE - 1], 0xcd);
    }

    #[test]
    fn write_page_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = PagedStorage::open(dir.path().join("heap.db")).unwrap();

        let first = PageBuffer::new();
        storage.append_page(&first).unwrap();

        let mut second = PageBuffer::new();
        second[10] = 0x42;
        storage.write_page(0, &second).unwrap();

        let read_back = storage.read_page(0).unwrap();
        assert_eq!(read_back[10], 0x42);
    }

    #[test]
    fn page_count_tracks_appended_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = PagedStorage::open(dir.path().join("heap.db")).unwrap();
        assert_eq!(storage.page_count().unwrap(), 0);

        storage.append_page(&PageBuffer::new()).unwrap();
        storage.append_page(&PageBuffer::new()).unwrap();
        assert_eq!(storage.page_count().unwrap(), 2);
    }
}
