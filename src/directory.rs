//! Page directory (C4): a slotted page whose records are themselves
//! `(page_number, free_space)` pairs, plus a header slot chaining one
//! directory to the next.
//!
//! A directory owns every data page it has read or created, keyed by page
//! number, in an unbounded cache that is never evicted — see the crate's
//! cache lifecycle notes in [`crate::heap`].

use std::collections::HashMap;

use crate::constants::{PageNumber, SlotId, FREE_SPACE_SIZE, PAGE_NUM_SIZE, SLOT_ENTRY_SIZE};
use crate::error::Result;
use crate::page::SlottedPage;
use crate::storage::PagedStorage;

fn encode_header(pd_number: PageNumber, next_dir: PageNumber) -> [u8; PAGE_NUM_SIZE + FREE_SPACE_SIZE] {
    let mut out = [0u8; PAGE_NUM_SIZE + FREE_SPACE_SIZE];
    out[..PAGE_NUM_SIZE].copy_from_slice(&pd_number.to_le_bytes());
    out[PAGE_NUM_SIZE..].copy_from_slice(&next_dir.to_le_bytes());
    out
}

fn encode_page_entry(page_number: PageNumber, free_space: usize) -> [u8; PAGE_NUM_SIZE + FREE_SPACE_SIZE] {
    let mut out = [0u8; PAGE_NUM_SIZE + FREE_SPACE_SIZE];
    out[..PAGE_NUM_SIZE].copy_from_slice(&page_number.to_le_bytes());
    out[PAGE_NUM_SIZE..].copy_from_slice(&(free_space as u32).to_le_bytes());
    out
}

pub struct PageDirectory {
    page: SlottedPage,
    pd_number: PageNumber,
    next_dir: PageNumber,
    cache: HashMap<PageNumber, SlottedPage>,
}

impl PageDirectory {
    /// The directory at page 0, for a brand-new file.
    pub fn new_head() -> PageDirectory {
        PageDirectory::new_with_number(0)
    }

    /// A directory chained in after `prev_pd_number`.
    pub fn new_chained(pd_number: PageNumber) -> PageDirectory {
        PageDirectory::new_with_number(pd_number)
    }

    fn new_with_number(pd_number: PageNumber) -> PageDirectory {
        let mut page = SlottedPage::new();
        page.insert_record(&encode_header(pd_number, 0))
            .expect("a fresh page always has room for its own header record");
        PageDirectory {
            page,
            pd_number,
            next_dir: 0,
            cache: HashMap::new(),
        }
    }

    /// Reconstructs a directory from a page already read off disk.
    pub fn from_buffer(buf: Box<crate::aligned::PageBuffer>) -> PageDirectory {
        let page = SlottedPage::from_buffer(buf);
        let header = page
            .read_record(0)
            .expect("a directory page always has its header in slot 0");
        let pd_number = u32::from_le_bytes(header[..PAGE_NUM_SIZE].try_into().expect("fixed width"));
        let next_dir = u32::from_le_bytes(header[PAGE_NUM_SIZE..].try_into().expect("fixed width"));
        PageDirectory {
            page,
            pd_number,
            next_dir,
            cache: HashMap::new(),
        }
    }

    pub fn pd_number(&self) -> PageNumber {
        self.pd_number
    }

    pub fn next_dir(&self) -> PageNumber {
        self.next_dir
    }

    /// Links this directory to `next`, rewriting its own header record.
    pub fn set_next_dir(&mut self, next: PageNumber) {
        self.next_dir = next;
        self.page
            .update_record(0, &encode_header(self.pd_number, next))
            .expect("header record is fixed-width and always updates in place");
    }

    pub fn page(&self) -> &SlottedPage {
        &self.page
    }

    pub fn cached_pages(&self) -> impl Iterator<Item = (&PageNumber, &SlottedPage)> {
        self.cache.iter()
    }

    /// `(slot_id, page_number, free_space)` for every tracked data page,
    /// i.e. every slot but the header in slot 0.
    fn page_entries(&self) -> impl Iterator<Item = (SlotId, PageNumber, usize)> + '_ {
        (1..self.page.slot_count()).filter_map(move |slot_id| {
            self.page.read_record(slot_id).map(|bytes| {
                let page_number = u32::from_le_bytes(bytes[..PAGE_NUM_SIZE].try_into().expect("fixed width"));
                let free_space =
                    u32::from_le_bytes(bytes[PAGE_NUM_SIZE..].try_into().expect("fixed width")) as usize;
                (slot_id, page_number, free_space)
            })
        })
    }

    /// Highest page number this directory currently tracks (its own number
    /// if it tracks no data pages yet). The next page this directory
    /// allocates is always one past this.
    pub fn max_tracked_page_number(&self) -> PageNumber {
        self.page_entries()
            .map(|(_, page_number, _)| page_number)
            .max()
            .unwrap_or(self.pd_number)
    }

    /// Loads `page_number` into the cache if it isn't already there.
    /// Returns `None` if this directory doesn't track that page at all.
    pub fn find_page(
        &mut self,
        storage: &mut PagedStorage,
        page_number: PageNumber,
    ) -> Result<Option<&mut SlottedPage>> {
        if !self.cache.contains_key(&page_number) {
            let tracked = self.page_entries().any(|(_, pn, _)| pn == page_number);
            if !tracked {
                return Ok(None);
            }
            tracing::trace!(page_number, "page cache miss, reading from storage");
            let buf = storage.read_page(page_number)?;
            self.cache.insert(page_number, SlottedPage::from_buffer(buf));
        }
        Ok(self.cache.get_mut(&page_number))
    }

    /// Finds a data page with at least `needed_space` free, or allocates a
    /// fresh one if this directory still has room to track one more.
    /// Returns `None` only when the directory page itself is full.
    pub fn find_or_create_data_page_for_insert(
        &mut self,
        storage: &mut PagedStorage,
        needed_space: usize,
    ) -> Result<Option<PageNumber>> {
        if let Some(page_number) = self
            .page_entries()
            .find(|&(_, _, free_space)| needed_space <= free_space)
            .map(|(_, page_number, _)| page_number)
        {
            self.find_page(storage, page_number)?;
            return Ok(Some(page_number));
        }

        let required = PAGE_NUM_SIZE + FREE_SPACE_SIZE + SLOT_ENTRY_SIZE;
        if required > self.page.free_space() {
            return Ok(None);
        }

        let page_number = self.max_tracked_page_number() + 1;
        let new_page = SlottedPage::new();
        self.page
            .insert_record(&encode_page_entry(page_number, new_page.free_space()))?;
        self.cache.insert(page_number, new_page);
        tracing::debug!(page_number, pd_number = self.pd_number, "allocated new data page");
        Ok(Some(page_number))
    }

    fn update_free_space(&mut self, page_number: PageNumber, free_space: usize) -> Result<()> {
        let slot_id = self
            .page_entries()
            .find(|&(_, pn, _)| pn == page_number)
            .map(|(slot_id, _, _)| slot_id)
            .expect("page_number must already be tracked by this directory");
        self.page
            .update_record(slot_id, &encode_page_entry(page_number, free_space))?;
        Ok(())
    }

    /// Tries every already-loaded page first; falls back to
    /// [`find_or_create_data_page_for_insert`]. Returns `None` if this
    /// directory has no room left for the record at all, in which case the
    /// caller must chain to (or create) the next directory.
    pub fn insert_record(
        &mut self,
        storage: &mut PagedStorage,
        record: &[u8],
    ) -> Result<Option<(PageNumber, SlotId)>> {
        let candidates: Vec<PageNumber> = self
            .cache
            .iter()
            .filter(|(_, page)| !page.is_full())
            .map(|(&page_number, _)| page_number)
            .collect();

        for page_number in candidates {
            let page = self.cache.get_mut(&page_number).expect("just listed from the cache");
            if let Ok(slot_id) = page.insert_record(record) {
                let free_space = page.free_space();
                self.update_free_space(page_number, free_space)?;
                return Ok(Some((page_number, slot_id)));
            }
        }

        let needed = record.len() + SLOT_ENTRY_SIZE;
        match self.find_or_create_data_page_for_insert(storage, needed)? {
            None => Ok(None),
            Some(page_number) => {
                let page = self
                    .cache
                    .get_mut(&page_number)
                    .expect("find_or_create_data_page_for_insert always leaves the page cached");
                let slot_id = page.insert_record(record)?;
                let free_space = page.free_space();
                self.update_free_space(page_number, free_space)?;
                Ok(Some((page_number, slot_id)))
            }
        }
    }

    /// Checks every tracked data page for `key`, returning the first hit.
    pub fn find_record(
        &mut self,
        storage: &mut PagedStorage,
        key: u32,
    ) -> Result<Option<(PageNumber, SlotId)>> {
        let page_numbers: Vec<PageNumber> = self.page_entries().map(|(_, page_number, _)| page_number).collect();
        for page_number in page_numbers {
            if let Some(page) = self.find_page(storage, page_number)? {
                if let Some(slot_id) = page.find_record(key) {
                    return Ok(Some((page_number, slot_id)));
                }
            }
        }
        Ok(None)
    }

    /// Updates the record at `(page_number, slot_id)` in place, keeping the
    /// directory's recorded free space for that page current. `Ok(None)`
    /// means the new bytes didn't fit on this page at all: the old record
    /// is already gone (tombstoned), and the caller must place `new_record`
    /// elsewhere, e.g. via the heap file's own insertion path.
    pub fn update_record(
        &mut self,
        storage: &mut PagedStorage,
        page_number: PageNumber,
        slot_id: SlotId,
        new_record: &[u8],
    ) -> Result<Option<SlotId>> {
        let page = self
            .find_page(storage, page_number)?
            .expect("caller-supplied page_number must already be tracked by this directory");
        let result = page.update_record(slot_id, new_record)?;
        let free_space = page.free_space();
        self.update_free_space(page_number, free_space)?;
        Ok(result)
    }

    /// Tombstones the record at `(page_number, slot_id)`, refreshing the
    /// directory's recorded free space for that page afterward.
    pub fn delete_record(
        &mut self,
        storage: &mut PagedStorage,
        page_number: PageNumber,
        slot_id: SlotId,
    ) -> Result<()> {
        let page = self
            .find_page(storage, page_number)?
            .expect("caller-supplied page_number must already be tracked by this directory");
        page.delete_record(slot_id);
        let free_space = page.free_space();
        self.update_free_space(page_number, free_space)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, PagedStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = PagedStorage::open(dir.path().join("heap.db")).unwrap();
        (dir, storage)
    }

    #[test]
    fn fresh_head_directory_has_own_header() {
        let dir = PageDirectory::new_head();
        assert_eq!(dir.pd_number(), 0);
        assert_eq!(dir.next_dir(), 0);
    }

    #[test]
    fn insert_allocates_a_data_page_on_demand() {
        let (_tmp, mut storage) = storage();
        let mut dir = PageDirectory::new_head();

        let (page_number, slot_id) = dir.insert_record(&mut storage, &[1, 0, 0, 0, b'a']).unwrap().unwrap();
        assert_eq!(page_number, 1, "first data page follows the head directory's own number");
        assert_eq!(slot_id, 0);
    }

    #[test]
    fn find_record_locates_inserted_record() {
        let (_tmp, mut storage) = storage();
        let mut dir = PageDirectory::new_head();

        dir.insert_record(&mut storage, &[1, 0, 0, 0, b'a']).unwrap();
        dir.insert_record(&mut storage, &[2, 0, 0, 0, b'b']).unwrap();

        let (page_number, slot_id) = dir.find_record(&mut storage, 2).unwrap().unwrap();
        assert_eq!(page_number, 1);
        assert_eq!(slot_id, 1);
        assert!(dir.find_record(&mut storage, 99).unwrap().is_none());
    }

    #[test]
    fn set_next_dir_persists_through_round_trip() {
        let mut dir = PageDirectory::new_head();
        dir.set_next_dir(7);
        assert_eq!(dir.next_dir(), 7);

        let buf = dir.page().data().to_vec();
        let mut boxed = crate::aligned::PageBuffer::new();
        boxed.copy_from_slice(&buf);
        let reloaded = PageDirectory::from_buffer(boxed);
        assert_eq!(reloaded.pd_number(), 0);
        assert_eq!(reloaded.next_dir(), 7);
    }

    #[test]
    fn reuses_a_page_with_enough_free_space_before_allocating_another() {
        let (_tmp, mut storage) = storage();
        let mut dir = PageDirectory::new_head();

        let (first_page, _) = dir.insert_record(&mut storage, &[1, 0, 0, 0]).unwrap().unwrap();
        let (second_page, _) = dir.insert_record(&mut storage, &[2, 0, 0, 0]).unwrap().unwrap();
        assert_eq!(first_page, second_page);
    }
}
