//! Layout constants shared by every on-disk structure.

/// Bytes per page. Chosen to match common filesystem block sizes.
pub const PAGE_SIZE: usize = 4096;

/// Width of a slot's offset field.
pub const OFFSET_SIZE: usize = 2;
/// Width of a slot's length field.
pub const LENGTH_SIZE: usize = 2;
/// `OFFSET_SIZE + LENGTH_SIZE`.
pub const SLOT_ENTRY_SIZE: usize = OFFSET_SIZE + LENGTH_SIZE;

/// Width of the footer's free-space-pointer field.
pub const FREE_SPACE_POINTER_SIZE: usize = 2;
/// Width of the footer's slot-count field.
pub const NUMBER_SLOTS_SIZE: usize = 2;
/// `FREE_SPACE_POINTER_SIZE + NUMBER_SLOTS_SIZE`.
pub const FOOTER_SIZE: usize = FREE_SPACE_POINTER_SIZE + NUMBER_SLOTS_SIZE;

/// Width of a page number as stored on disk.
pub const PAGE_NUM_SIZE: usize = 4;
/// Width of a free-space byte count as stored in a directory entry.
pub const FREE_SPACE_SIZE: usize = 4;

/// Width of a record key (the first field of every record, by convention a 4-byte int).
pub const KEY_SIZE: usize = 4;

/// Branching factor of the per-page B+ tree index.
pub const BTREE_BRANCHING_FACTOR: usize = PAGE_SIZE / LENGTH_SIZE;

/// Largest encodable `var_str` payload (a 1-byte length prefix).
pub const MAX_VAR_STR_LEN: usize = u8::MAX as usize;

/// A page number, as stored in directory entries and used to address the
/// paged storage layer. Matches `PAGE_NUM_SIZE` (4 bytes).
pub type PageNumber = u32;

/// A slot id within a single page.
pub type SlotId = u16;
