use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::Direction;

/// Size of one memory page; the single-page path always transfers exactly this much.
pub const PAGE_SIZE: usize = 4096;

/// Memory that a request segment copies to or from.
///
/// Implementations hand out their bytes through short-lived mappings (`with_bytes*`), the
/// equivalent of mapping a page into the device's address space for the duration of one copy.
pub trait MemoryRegion: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the region is a compound (huge) page made of several base pages.
    fn is_compound(&self) -> bool {
        false
    }

    fn with_bytes(&self, f: &mut dyn FnMut(&[u8]));

    fn with_bytes_mut(&self, f: &mut dyn FnMut(&mut [u8]));

    /// Makes bytes written through the device's mapping visible to every other mapping of
    /// the same memory (and vice versa).
    ///
    /// The processor calls this after copying into the region on reads and before copying
    /// out of it on writes.
    fn flush_dcache(&self) {}

    /// Completion signal for the single-page path.
    fn end_io(&self, _direction: Direction, _ok: bool) {}
}

/// Heap-backed page (or compound page) with the flags the single-page path maintains.
pub struct Page {
    data: Mutex<Box<[u8]>>,
    order: u32,
    uptodate: AtomicBool,
    error: AtomicBool,
    dcache_flushes: AtomicU64,
}

impl Page {
    /// Largest compound order accepted by [`Page::with_order`] (2 MiB with 4 KiB pages).
    pub const MAX_ORDER: u32 = 9;

    pub fn new() -> Self {
        Self::with_order(0)
    }

    /// A zeroed compound page spanning `2^order` base pages; `order` is clamped to
    /// [`Page::MAX_ORDER`].
    pub fn with_order(order: u32) -> Self {
        let order = order.min(Self::MAX_ORDER);
        Self {
            data: Mutex::new(vec![0u8; PAGE_SIZE << order].into_boxed_slice()),
            order,
            uptodate: AtomicBool::new(false),
            error: AtomicBool::new(false),
            dcache_flushes: AtomicU64::new(0),
        }
    }

    /// A single page whose leading bytes are `bytes` (at most one page is kept).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let page = Self::new();
        let len = bytes.len().min(PAGE_SIZE);
        page.lock()[..len].copy_from_slice(&bytes[..len]);
        page
    }

    pub fn filled(byte: u8) -> Self {
        let page = Self::new();
        page.lock().fill(byte);
        page
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn is_uptodate(&self) -> bool {
        self.uptodate.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// Number of visibility synchronizations performed on this page.
    pub fn dcache_flushes(&self) -> u64 {
        self.dcache_flushes.load(Ordering::Acquire)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().to_vec()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<[u8]>> {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("order", &self.order)
            .field("uptodate", &self.is_uptodate())
            .field("error", &self.has_error())
            .finish_non_exhaustive()
    }
}

impl MemoryRegion for Page {
    fn len(&self) -> usize {
        PAGE_SIZE << self.order
    }

    fn is_compound(&self) -> bool {
        self.order > 0
    }

    fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) {
        let guard = self.lock();
        f(&guard[..]);
    }

    fn with_bytes_mut(&self, f: &mut dyn FnMut(&mut [u8])) {
        let mut guard = self.lock();
        f(&mut guard[..]);
    }

    fn flush_dcache(&self) {
        // Host memory is coherent; the counter lets callers observe the synchronization.
        self.dcache_flushes.fetch_add(1, Ordering::AcqRel);
    }

    fn end_io(&self, direction: Direction, ok: bool) {
        match (direction, ok) {
            (Direction::Read, true) => {
                self.error.store(false, Ordering::Release);
                self.uptodate.store(true, Ordering::Release);
            }
            (Direction::Read, false) => {
                self.uptodate.store(false, Ordering::Release);
                self.error.store(true, Ordering::Release);
            }
            (Direction::Write, true) => {}
            (Direction::Write, false) => self.error.store(true, Ordering::Release),
        }
    }
}
