//! In-memory block device: a sector-addressed [`BackingStore`], the [`RequestProcessor`] that
//! serves block requests against it, and the [`DeviceLifecycle`] that registers it with a host.
//!
//! This crate only re-exports the workspace members; see `ramdisk-storage` and `ramdisk-blk`.

pub use ramdisk_blk::*;
pub use ramdisk_storage as storage;
