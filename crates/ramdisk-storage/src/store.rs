use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::util::checked_range;
use crate::{Result, StoreError, SECTOR_SIZE};

type Chunk = Box<[u8]>;

/// Fixed-capacity, zero-initialized byte buffer addressed by 512-byte sector.
///
/// The whole buffer is allocated up front, split into fixed-size chunks that each sit behind
/// their own reader/writer lock. Construction fails with [`StoreError::Allocation`] when the
/// memory cannot be reserved; after that no read or write allocates. A single [`read_into`]
/// or [`write`] locks every chunk it touches, in ascending order, for the whole copy:
///
/// - copies to disjoint chunk ranges run in parallel,
/// - each copy is atomic with respect to the bytes it touches,
/// - the fixed lock order rules out deadlock between overlapping copies.
///
/// All methods take `&self`; share the store between threads with an `Arc`.
///
/// [`read_into`]: BackingStore::read_into
/// [`write`]: BackingStore::write
pub struct BackingStore {
    capacity: u64,
    chunk_size: usize,
    chunks: Box<[RwLock<Chunk>]>,
    released: AtomicBool,
}

impl BackingStore {
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    pub fn new(capacity_sectors: u64) -> Result<Self> {
        Self::with_chunk_size(capacity_sectors, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(capacity_sectors: u64, chunk_size: usize) -> Result<Self> {
        let size_bytes = capacity_sectors
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(StoreError::Allocation {
                size_bytes: u64::MAX,
                reason: "capacity overflows u64",
            })?;
        let alloc_err = |reason| StoreError::Allocation { size_bytes, reason };

        if capacity_sectors == 0 {
            return Err(alloc_err("capacity must be at least one sector"));
        }
        if chunk_size == 0 || chunk_size % SECTOR_SIZE != 0 {
            return Err(alloc_err("chunk size must be a non-zero multiple of 512"));
        }
        let size_usize =
            usize::try_from(size_bytes).map_err(|_| alloc_err("capacity does not fit in usize"))?;

        // Reserve the full size in one piece first so a size the host cannot back is refused
        // before any chunk is zeroed.
        Vec::<u8>::new()
            .try_reserve_exact(size_usize)
            .map_err(|_| alloc_err("unable to reserve backing memory"))?;

        let chunk_count = usize::try_from(size_bytes.div_ceil(chunk_size as u64))
            .map_err(|_| alloc_err("chunk count does not fit in usize"))?;
        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(chunk_count)
            .map_err(|_| alloc_err("unable to reserve chunk table"))?;
        let mut remaining = size_usize;
        while remaining > 0 {
            let len = remaining.min(chunk_size);
            let chunk = zeroed_chunk(len).ok_or_else(|| alloc_err("unable to allocate chunk"))?;
            chunks.push(RwLock::new(chunk));
            remaining -= len;
        }

        tracing::debug!(
            capacity_bytes = size_bytes,
            chunk_size,
            chunk_count,
            "backing store allocated"
        );

        Ok(Self {
            capacity: size_bytes,
            chunk_size,
            chunks: chunks.into_boxed_slice(),
            released: AtomicBool::new(false),
        })
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity / SECTOR_SIZE as u64
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Bytes of backing memory currently held: the full capacity until [`release`].
    ///
    /// [`release`]: BackingStore::release
    pub fn resident_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .map(|chunk| read_lock(chunk).len() as u64)
            .sum()
    }

    /// Returns `len` bytes starting at `sector`.
    pub fn read(&self, sector: u64, len: usize) -> Result<Vec<u8>> {
        // Refuse before sizing the output buffer from an unchecked length.
        self.check_access(sector, len)?;
        let mut out = vec![0u8; len];
        self.read_into(sector, &mut out)?;
        Ok(out)
    }

    /// Copies `dst.len()` bytes starting at `sector` into `dst`.
    pub fn read_into(&self, sector: u64, dst: &mut [u8]) -> Result<()> {
        let offset = self.check_access(sector, dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }

        let (first, last) = self.chunk_span(offset, dst.len());
        let guards: Vec<RwLockReadGuard<'_, Chunk>> =
            self.chunks[first..=last].iter().map(read_lock).collect();
        if self.is_released() {
            return Err(StoreError::Released);
        }

        let mut cur = offset;
        let mut remaining = dst;
        for (i, guard) in guards.iter().enumerate() {
            let within = (cur - self.chunk_start(first + i)) as usize;
            let take = (guard.len() - within).min(remaining.len());
            remaining[..take].copy_from_slice(&guard[within..within + take]);
            cur += take as u64;
            remaining = &mut std::mem::take(&mut remaining)[take..];
        }
        debug_assert!(remaining.is_empty());

        Ok(())
    }

    /// Overwrites the bytes starting at `sector` with `src`.
    ///
    /// On error the buffer is left untouched.
    pub fn write(&self, sector: u64, src: &[u8]) -> Result<()> {
        let offset = self.check_access(sector, src.len())?;
        if src.is_empty() {
            return Ok(());
        }

        let (first, last) = self.chunk_span(offset, src.len());
        let mut guards: Vec<RwLockWriteGuard<'_, Chunk>> =
            self.chunks[first..=last].iter().map(write_lock).collect();
        // Checked under the locks: `release` raises the flag before it takes them.
        if self.is_released() {
            return Err(StoreError::Released);
        }

        let mut cur = offset;
        let mut remaining = src;
        for (i, guard) in guards.iter_mut().enumerate() {
            let within = (cur - self.chunk_start(first + i)) as usize;
            let take = (guard.len() - within).min(remaining.len());
            guard[within..within + take].copy_from_slice(&remaining[..take]);
            cur += take as u64;
            remaining = &remaining[take..];
        }
        debug_assert!(remaining.is_empty());

        Ok(())
    }

    /// Frees every chunk. Copies already holding chunk locks finish first; later accesses
    /// fail with [`StoreError::Released`]. Calling it again is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for chunk in self.chunks.iter() {
            *write_lock(chunk) = Box::default();
        }
        tracing::debug!(capacity_bytes = self.capacity, "backing store released");
    }

    fn check_access(&self, sector: u64, len: usize) -> Result<u64> {
        if len % SECTOR_SIZE != 0 {
            return Err(StoreError::UnalignedLength {
                len,
                alignment: SECTOR_SIZE,
            });
        }
        if self.is_released() {
            return Err(StoreError::Released);
        }
        checked_range(sector, len, self.capacity)
    }

    #[inline]
    fn chunk_start(&self, idx: usize) -> u64 {
        idx as u64 * self.chunk_size as u64
    }

    /// Inclusive chunk index range covering `[offset, offset + len)`; `len` must be non-zero.
    #[inline]
    fn chunk_span(&self, offset: u64, len: usize) -> (usize, usize) {
        let chunk_size = self.chunk_size as u64;
        let first = (offset / chunk_size) as usize;
        let last = ((offset + len as u64 - 1) / chunk_size) as usize;
        (first, last)
    }
}

impl fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingStore")
            .field("capacity", &self.capacity)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_count", &self.chunks.len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// A zeroed chunk, or `None` if the allocator refuses.
fn zeroed_chunk(len: usize) -> Option<Chunk> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0u8);
    Some(buf.into_boxed_slice())
}

fn read_lock(chunk: &RwLock<Chunk>) -> RwLockReadGuard<'_, Chunk> {
    chunk.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(chunk: &RwLock<Chunk>) -> RwLockWriteGuard<'_, Chunk> {
    chunk.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 4 * SECTOR_SIZE;

    #[test]
    fn fresh_store_is_fully_backed_and_zeroed() {
        let store = BackingStore::with_chunk_size(16, CHUNK).unwrap();
        assert_eq!(store.capacity_bytes(), 16 * 512);
        assert_eq!(store.capacity_sectors(), 16);
        assert_eq!(store.resident_bytes(), 16 * 512);

        let data = store.read(0, 16 * SECTOR_SIZE).unwrap();
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn write_spanning_chunks_roundtrips() {
        let store = BackingStore::with_chunk_size(16, CHUNK).unwrap();
        let payload: Vec<u8> = (0..6 * SECTOR_SIZE).map(|i| (i % 251) as u8).collect();

        // Sectors 2..8 straddle the first two chunks.
        store.write(2, &payload).unwrap();
        assert_eq!(store.read(2, payload.len()).unwrap(), payload);

        // Neighbouring sectors are still zero.
        assert!(store.read(0, 2 * SECTOR_SIZE).unwrap().iter().all(|b| *b == 0));
        assert!(store.read(8, SECTOR_SIZE).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn short_final_chunk_is_addressable() {
        // 5 sectors with 4-sector chunks leaves a 1-sector tail chunk.
        let store = BackingStore::with_chunk_size(5, CHUNK).unwrap();
        let payload = vec![0xA5u8; 2 * SECTOR_SIZE];
        store.write(3, &payload).unwrap();
        assert_eq!(store.read(3, payload.len()).unwrap(), payload);
        assert_eq!(store.resident_bytes(), 5 * SECTOR_SIZE as u64);
        assert_eq!(store.chunks[1].read().unwrap().len(), SECTOR_SIZE);
    }

    #[test]
    fn out_of_range_write_leaves_store_unchanged() {
        let store = BackingStore::with_chunk_size(8, CHUNK).unwrap();
        store.write(6, &[0x11u8; 2 * SECTOR_SIZE]).unwrap();

        let err = store.write(7, &[0x22u8; 2 * SECTOR_SIZE]).unwrap_err();
        assert_eq!(
            err,
            StoreError::OutOfRange {
                sector: 7,
                len: 2 * SECTOR_SIZE,
                capacity: 8 * 512
            }
        );
        assert_eq!(store.read(6, 2 * SECTOR_SIZE).unwrap(), vec![0x11u8; 2 * SECTOR_SIZE]);
    }

    #[test]
    fn oversized_read_is_refused_before_allocating() {
        let store = BackingStore::new(8).unwrap();
        assert_eq!(
            store.read(0, 1 << 46).unwrap_err(),
            StoreError::OutOfRange {
                sector: 0,
                len: 1 << 46,
                capacity: 8 * 512
            }
        );
        assert!(matches!(
            store.read(u64::MAX, SECTOR_SIZE),
            Err(StoreError::OffsetOverflow)
        ));
    }

    #[test]
    fn unaligned_length_is_refused() {
        let store = BackingStore::new(8).unwrap();
        assert_eq!(
            store.write(0, &[1u8; 100]).unwrap_err(),
            StoreError::UnalignedLength {
                len: 100,
                alignment: SECTOR_SIZE
            }
        );
        let mut buf = [0u8; 513];
        assert!(matches!(
            store.read_into(0, &mut buf),
            Err(StoreError::UnalignedLength { len: 513, .. })
        ));
    }

    #[test]
    fn empty_access_at_capacity_is_allowed() {
        let store = BackingStore::new(8).unwrap();
        store.write(8, &[]).unwrap();
        assert!(store.read(8, 0).unwrap().is_empty());
        assert!(matches!(
            store.read(9, 0),
            Err(StoreError::OutOfRange { .. })
        ));
    }

    #[test]
    fn invalid_geometry_is_an_allocation_error() {
        assert!(matches!(
            BackingStore::new(0),
            Err(StoreError::Allocation { .. })
        ));
        assert!(matches!(
            BackingStore::new(u64::MAX),
            Err(StoreError::Allocation { .. })
        ));
        // 512 PiB: beyond any address space, so the up-front reservation must fail.
        assert!(matches!(
            BackingStore::new(1 << 50),
            Err(StoreError::Allocation { .. })
        ));
        assert!(matches!(
            BackingStore::with_chunk_size(8, 1000),
            Err(StoreError::Allocation { .. })
        ));
        assert!(matches!(
            BackingStore::with_chunk_size(8, 0),
            Err(StoreError::Allocation { .. })
        ));
    }

    #[test]
    fn release_frees_chunks_and_is_idempotent() {
        let store = BackingStore::with_chunk_size(8, CHUNK).unwrap();
        store.write(0, &[0xFFu8; SECTOR_SIZE]).unwrap();
        assert_eq!(store.resident_bytes(), 8 * 512);

        store.release();
        store.release();

        assert!(store.is_released());
        assert_eq!(store.resident_bytes(), 0);
        assert_eq!(store.read(0, SECTOR_SIZE).unwrap_err(), StoreError::Released);
        assert_eq!(
            store.write(0, &[0u8; SECTOR_SIZE]).unwrap_err(),
            StoreError::Released
        );
    }
}
