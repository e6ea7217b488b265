//! Slotted data page (C2).
//!
//! A page holds variable-length records growing forward from byte 0, and a
//! slot directory growing backward from the footer. The footer itself is
//! the last four bytes of the page:
//!
//! ```text
//! +---------+----------------+------+----------------+--------+--------+
//! | records | (free space)   | ...  | slot 1 | slot 0 | count  | fsptr  |
//! +---------+----------------+------+----------------+--------+--------+
//! 0                                              PAGE_SIZE-4   PAGE_SIZE
//! ```
//!
//! Each slot entry is `(offset: u16, length: u16)`. A `length` of zero marks
//! a deleted record; the slot itself stays put so its id can be reused.
//! Deletes and shrinking updates trigger an eager compaction pass that
//! closes gaps between surviving records.
//!
//! Every page also carries an in-memory [`BTreeIndex`] from key to slot,
//! rebuilt from the slot directory whenever the page is loaded.

use crate::aligned::PageBuffer;
use crate::btree::BTreeIndex;
use crate::codec::key_of;
use crate::constants::{SlotId, FOOTER_SIZE, NUMBER_SLOTS_SIZE, OFFSET_SIZE, PAGE_SIZE, SLOT_ENTRY_SIZE};
use crate::error::{Error, Result};

const FOOTER_START: usize = PAGE_SIZE - FOOTER_SIZE;
const SLOT_COUNT_OFFSET: usize = FOOTER_START;
const FREE_SPACE_PTR_OFFSET: usize = FOOTER_START + NUMBER_SLOTS_SIZE;

pub struct SlottedPage {
    data: Box<PageBuffer>,
    index: BTreeIndex,
}

impl Default for SlottedPage {
    fn default() -> SlottedPage {
        SlottedPage {
            data: PageBuffer::new(),
            index: BTreeIndex::new(),
        }
    }
}

impl SlottedPage {
    pub fn new() -> SlottedPage {
        SlottedPage::default()
    }

    /// Wraps an already-populated buffer (e.g. just read off disk),
    /// rebuilding the key index from its slot directory.
    pub fn from_buffer(data: Box<PageBuffer>) -> SlottedPage {
        let mut page = SlottedPage {
            data,
            index: BTreeIndex::new(),
        };
        let entries: Vec<(u32, SlotId)> = (0..page.slot_count())
            .filter_map(|slot_id| {
                let (_, length) = page.slot_entry(slot_id);
                if length == 0 {
                    return None;
                }
                let record = page.read_record(slot_id)?;
                key_of(record).ok().map(|key| (u32::from_le_bytes(key), slot_id))
            })
            .collect();
        page.index = BTreeIndex::rebuild(entries);
        page
    }

    pub fn data(&self) -> &PageBuffer {
        &self.data
    }

    pub fn into_buffer(self) -> Box<PageBuffer> {
        self.data
    }

    /// Bytes still available for a new record, including the slot entry it
    /// would need.
    pub fn free_space(&self) -> usize {
        let used_by_slots = self.slot_count() as usize * SLOT_ENTRY_SIZE;
        PAGE_SIZE - self.free_space_pointer() as usize - used_by_slots - FOOTER_SIZE
    }

    pub fn is_full(&self) -> bool {
        self.free_space() == 0
    }

    /// True once every slot holds a live record, i.e. nothing has been
    /// deleted since the page was last compacted.
    pub fn is_packed(&self) -> bool {
        (0..self.slot_count()).all(|slot_id| self.slot_entry(slot_id).1 != 0)
    }

    /// Inserts `record`'s bytes, reusing the highest-numbered tombstoned
    /// slot if one exists, otherwise appending a fresh slot.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<SlotId> {
        let needed = record.len() + SLOT_ENTRY_SIZE;
        if needed > self.free_space() {
            return Err(Error::RecordTooLarge {
                size: record.len(),
                capacity: self.free_space().saturating_sub(SLOT_ENTRY_SIZE),
            });
        }

        let write_at = self.free_space_pointer();
        self.data[write_at as usize..write_at as usize + record.len()].copy_from_slice(record);

        let slot_id = if self.is_packed() {
            self.slot_count()
        } else {
            (0..self.slot_count())
                .filter(|&s| self.slot_entry(s).1 == 0)
                .last()
                .expect("is_packed() false implies a tombstoned slot exists")
        };

        self.write_slot_entry(slot_id, write_at, record.len() as u16);
        if slot_id == self.slot_count() {
            self.write_slot_count(self.slot_count() + 1);
        }
        self.write_free_space_pointer(write_at + record.len() as u16);

        if let Ok(key) = key_of(record) {
            self.index.insert(u32::from_le_bytes(key), slot_id);
        }

        Ok(slot_id)
    }

    pub fn read_record(&self, slot_id: SlotId) -> Option<&[u8]> {
        let (offset, length) = self.slot_entry(slot_id);
        if length == 0 {
            return None;
        }
        Some(&self.data[offset as usize..offset as usize + length as usize])
    }

    /// Tombstones `slot_id`'s entry and eagerly compacts the page.
    pub fn delete_record(&mut self, slot_id: SlotId) {
        let (offset, _) = self.slot_entry(slot_id);
        self.write_slot_entry(slot_id, offset, 0);
        self.compact_page();
    }

    /// Overwrites `slot_id`'s record with `new_record`.
    ///
    /// - Same length: overwritten in place, slot id unchanged.
    /// - Shorter: overwritten in place and the page compacted, slot id
    ///   unchanged.
    /// - Longer: the old record is deleted and `new_record` is inserted
    ///   fresh. Returns `Ok(None)` if it didn't fit on this page — the old
    ///   record is already gone and the caller must place it elsewhere.
    pub fn update_record(&mut self, slot_id: SlotId, new_record: &[u8]) -> Result<Option<SlotId>> {
        let (offset, length) = self.slot_entry(slot_id);
        use std::cmp::Ordering::*;
        match new_record.len().cmp(&(length as usize)) {
            Equal => {
                self.data[offset as usize..offset as usize + new_record.len()]
                    .copy_from_slice(new_record);
                Ok(Some(slot_id))
            }
            Less => {
                self.data[offset as usize..offset as usize + new_record.len()]
                    .copy_from_slice(new_record);
                self.write_slot_entry(slot_id, offset, new_record.len() as u16);
                self.compact_page();
                Ok(Some(slot_id))
            }
            Greater => {
                self.delete_record(slot_id);
                match self.insert_record(new_record) {
                    Ok(new_slot) => Ok(Some(new_slot)),
                    Err(Error::RecordTooLarge { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Looks up `key` by scanning every live slot, falling back to the
    /// index only if the scan turns up nothing. The index is consulted
    /// defensively: its answer is re-validated against the slot it names,
    /// since deletes don't scrub stale index entries.
    pub fn find_record(&self, key: u32) -> Option<SlotId> {
        for slot_id in 0..self.slot_count() {
            if let Some(record) = self.read_record(slot_id) {
                if let Ok(found) = key_of(record) {
                    if u32::from_le_bytes(found) == key {
                        return Some(slot_id);
                    }
                }
            }
        }

        let candidate = self.index.search(key)?;
        let record = self.read_record(candidate)?;
        let found = key_of(record).ok()?;
        (u32::from_le_bytes(found) == key).then_some(candidate)
    }

    /// Reclaims space left by tombstoned records, packing survivors
    /// contiguously from byte 0 in their current offset order.
    fn compact_page(&mut self) {
        let mut entries: Vec<(SlotId, u16, u16)> = (0..self.slot_count())
            .map(|slot_id| {
                let (offset, length) = self.slot_entry(slot_id);
                (slot_id, offset, length)
            })
            .collect();
        entries.sort_by_key(|&(_, offset, _)| offset);

        let mut write_ptr = 0u16;
        for (slot_id, offset, length) in entries {
            if length == 0 {
                continue;
            }
            if offset != write_ptr {
                self.data.copy_within(
                    offset as usize..offset as usize + length as usize,
                    write_ptr as usize,
                );
            }
            self.write_slot_entry(slot_id, write_ptr, length);
            write_ptr += length;
        }
        self.write_free_space_pointer(write_ptr);
    }
}

/// Low-level footer and slot-directory accessors.
impl SlottedPage {
    fn free_space_pointer(&self) -> u16 {
        u16::from_le_bytes(
            self.data[FREE_SPACE_PTR_OFFSET..FREE_SPACE_PTR_OFFSET + 2]
                .try_into()
                .expect("fixed-width slice"),
        )
    }

    fn write_free_space_pointer(&mut self, value: u16) {
        self.data[FREE_SPACE_PTR_OFFSET..FREE_SPACE_PTR_OFFSET + 2]
            .copy_from_slice(&value.to_le_bytes());
    }

    /// Number of slots in the directory, live or tombstoned.
    pub fn slot_count(&self) -> SlotId {
        u16::from_le_bytes(
            self.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 2]
                .try_into()
                .expect("fixed-width slice"),
        )
    }

    fn write_slot_count(&mut self, value: SlotId) {
        self.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn slot_offset(slot_id: SlotId) -> usize {
        FOOTER_START - SLOT_ENTRY_SIZE * (slot_id as usize + 1)
    }

    fn slot_entry(&self, slot_id: SlotId) -> (u16, u16) {
        let at = Self::slot_offset(slot_id);
        let offset = u16::from_le_bytes(self.data[at..at + OFFSET_SIZE].try_into().expect("fixed-width slice"));
        let length = u16::from_le_bytes(
            self.data[at + OFFSET_SIZE..at + SLOT_ENTRY_SIZE]
                .try_into()
                .expect("fixed-width slice"),
        );
        (offset, length)
    }

    fn write_slot_entry(&mut self, slot_id: SlotId, offset: u16, length: u16) {
        let at = Self::slot_offset(slot_id);
        self.data[at..at + OFFSET_SIZE].copy_from_slice(&offset.to_le_bytes());
        self.data[at + OFFSET_SIZE..at + SLOT_ENTRY_SIZE].copy_from_slice(&length.to_le_bytes());
    }
}
