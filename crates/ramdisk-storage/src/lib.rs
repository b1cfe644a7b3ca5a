//! Sector-addressed memory backing for the ramdisk block device.
//!
//! [`BackingStore`] is the only place that turns a sector number into a byte offset. Every
//! access is range-checked against the fixed capacity before any byte is copied, so callers
//! never index the buffer directly.

mod error;
mod store;
mod util;

pub use error::{Result, StoreError};
pub use store::BackingStore;
pub use util::{checked_range, is_sector_aligned, len_to_sectors, sector_to_offset};

/// Size of one addressable sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// `log2(SECTOR_SIZE)`.
pub const SECTOR_SHIFT: u32 = 9;

#[cfg(test)]
mod proptests;
