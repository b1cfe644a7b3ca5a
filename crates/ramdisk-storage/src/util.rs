use crate::{Result, StoreError, SECTOR_SHIFT, SECTOR_SIZE};

/// Byte offset of `sector`, or `OffsetOverflow` if it does not fit in a `u64`.
pub fn sector_to_offset(sector: u64) -> Result<u64> {
    sector
        .checked_mul(SECTOR_SIZE as u64)
        .ok_or(StoreError::OffsetOverflow)
}

pub fn is_sector_aligned(value: u64) -> bool {
    value & (SECTOR_SIZE as u64 - 1) == 0
}

/// Number of whole sectors covered by `len` bytes.
pub fn len_to_sectors(len: usize) -> u64 {
    (len as u64) >> SECTOR_SHIFT
}

pub fn checked_range(sector: u64, len: usize, capacity: u64) -> Result<u64> {
    let offset = sector_to_offset(sector)?;
    let end = offset
        .checked_add(len as u64)
        .ok_or(StoreError::OffsetOverflow)?;
    if end > capacity {
        return Err(StoreError::OutOfRange {
            sector,
            len,
            capacity,
        });
    }
    Ok(offset)
}
