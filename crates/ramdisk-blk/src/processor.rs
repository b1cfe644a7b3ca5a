use std::sync::Arc;

use ramdisk_storage::{is_sector_aligned, len_to_sectors, BackingStore, StoreError};

use crate::{Completion, Direction, IoRequest, MemoryRegion, RequestError, PAGE_SIZE};

/// Turns block requests into copies against a [`BackingStore`].
///
/// The processor holds no mutable state of its own, so any number of threads may call
/// [`handle`](Self::handle) concurrently on a shared instance.
#[derive(Debug, Clone)]
pub struct RequestProcessor {
    store: Arc<BackingStore>,
}

impl RequestProcessor {
    pub fn new(store: Arc<BackingStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<BackingStore> {
        &self.store
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.store.capacity_sectors()
    }

    /// Runs `request` to completion, signals the result to its submitter and returns it.
    pub fn handle(&self, request: IoRequest) -> Completion {
        let completion = match self.process(&request) {
            Ok(()) => Completion::Success,
            Err(err) => {
                tracing::warn!(
                    sector = request.sector(),
                    direction = ?request.direction(),
                    segments = request.segments().len(),
                    error = %err,
                    "request failed"
                );
                Completion::IoError
            }
        };
        request.complete(completion);
        completion
    }

    /// Applies the segments of `request` in order, advancing the sector cursor by each
    /// segment's length.
    ///
    /// Stops at the first failing segment. Segments before it stay applied.
    pub fn process(&self, request: &IoRequest) -> Result<(), RequestError> {
        tracing::debug!(
            sector = request.sector(),
            direction = ?request.direction(),
            segments = request.segments().len(),
            bytes = request.total_len(),
            "request"
        );

        let mut sector = request.sector();
        for (index, segment) in request.segments().iter().enumerate() {
            self.do_segment(
                index,
                segment.region(),
                segment.len(),
                segment.offset(),
                request.direction(),
                sector,
            )?;
            sector = sector
                .checked_add(len_to_sectors(segment.len()))
                .ok_or(RequestError::SectorOverflow { index })?;
        }
        Ok(())
    }

    /// Single-region transfer for hosts that move whole pages outside of multi-segment
    /// requests.
    ///
    /// Compound regions are refused up front; nothing is copied.
    pub fn handle_single_region(
        &self,
        region: &dyn MemoryRegion,
        len: usize,
        offset: usize,
        direction: Direction,
        sector: u64,
    ) -> Result<(), RequestError> {
        if region.is_compound() {
            return Err(RequestError::Unsupported(
                "compound pages cannot be transferred as a single region",
            ));
        }
        self.do_segment(0, region, len, offset, direction, sector)
    }

    /// Transfers one full page at `sector` and reports the outcome on the page itself.
    pub fn rw_page(
        &self,
        sector: u64,
        page: &dyn MemoryRegion,
        direction: Direction,
    ) -> Result<(), RequestError> {
        let result = self.handle_single_region(page, PAGE_SIZE, 0, direction, sector);
        if !matches!(result, Err(RequestError::Unsupported(_))) {
            page.end_io(direction, result.is_ok());
        }
        result
    }

    fn do_segment(
        &self,
        index: usize,
        region: &dyn MemoryRegion,
        len: usize,
        offset: usize,
        direction: Direction,
        sector: u64,
    ) -> Result<(), RequestError> {
        if !is_sector_aligned(offset as u64) || !is_sector_aligned(len as u64) {
            return Err(RequestError::Alignment { index, offset, len });
        }
        let region_len = region.len();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= region_len)
            .ok_or(RequestError::RegionOverrun {
                index,
                offset,
                len,
                region_len,
            })?;

        tracing::trace!(index, sector, len, ?direction, "segment");

        let mut result: Result<(), StoreError> = Ok(());
        match direction {
            Direction::Read => {
                region.with_bytes_mut(&mut |bytes: &mut [u8]| {
                    result = self.store.read_into(sector, &mut bytes[offset..end]);
                });
                region.flush_dcache();
            }
            Direction::Write => {
                region.flush_dcache();
                region.with_bytes(&mut |bytes: &[u8]| {
                    result = self.store.write(sector, &bytes[offset..end]);
                });
            }
        }
        result.map_err(|source| RequestError::Storage { index, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Page, Segment};
    use ramdisk_storage::SECTOR_SIZE;
    use std::sync::Mutex;

    fn processor(sectors: u64) -> RequestProcessor {
        RequestProcessor::new(Arc::new(BackingStore::new(sectors).unwrap()))
    }

    /// Region that records the order of mappings and visibility syncs.
    struct RecordingRegion {
        bytes: Mutex<Vec<u8>>,
        events: Mutex<Vec<&'static str>>,
    }

    impl RecordingRegion {
        fn new(len: usize, fill: u8) -> Self {
            Self {
                bytes: Mutex::new(vec![fill; len]),
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    impl MemoryRegion for RecordingRegion {
        fn len(&self) -> usize {
            self.bytes.lock().unwrap().len()
        }

        fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) {
            self.events.lock().unwrap().push("copy-out");
            f(&self.bytes.lock().unwrap()[..]);
        }

        fn with_bytes_mut(&self, f: &mut dyn FnMut(&mut [u8])) {
            self.events.lock().unwrap().push("copy-in");
            f(&mut self.bytes.lock().unwrap()[..]);
        }

        fn flush_dcache(&self) {
            self.events.lock().unwrap().push("flush");
        }
    }

    #[test]
    fn read_flushes_after_copy_and_write_flushes_before() {
        let proc = processor(16);

        let src = Arc::new(RecordingRegion::new(SECTOR_SIZE, 0x42));
        let req = IoRequest::write(3).with_segment(Segment::new(src.clone(), 0, SECTOR_SIZE));
        assert_eq!(proc.handle(req), Completion::Success);
        assert_eq!(src.events(), vec!["flush", "copy-out"]);

        let dst = Arc::new(RecordingRegion::new(SECTOR_SIZE, 0));
        let req = IoRequest::read(3).with_segment(Segment::new(dst.clone(), 0, SECTOR_SIZE));
        assert_eq!(proc.handle(req), Completion::Success);
        assert_eq!(dst.events(), vec!["copy-in", "flush"]);
        assert_eq!(*dst.bytes.lock().unwrap(), vec![0x42; SECTOR_SIZE]);
    }

    #[test]
    fn segment_offset_selects_bytes_inside_region() {
        let proc = processor(16);
        let mut bytes = vec![0u8; 4096];
        bytes[1024..1536].fill(0x77);
        let page = Arc::new(Page::from_bytes(&bytes));

        let req = IoRequest::write(5).with_segment(Segment::new(page, 1024, 512));
        assert_eq!(proc.handle(req), Completion::Success);
        assert_eq!(proc.store().read(5, 512).unwrap(), vec![0x77; 512]);
        assert!(proc.store().read(4, 512).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn misaligned_offset_and_length_are_rejected_before_copying() {
        let proc = processor(16);
        let page = Arc::new(Page::filled(0xEE));

        let req = IoRequest::write(0).with_segment(Segment::new(page.clone(), 100, 512));
        assert_eq!(
            proc.process(&req).unwrap_err(),
            RequestError::Alignment {
                index: 0,
                offset: 100,
                len: 512
            }
        );

        let req = IoRequest::write(0).with_segment(Segment::new(page.clone(), 0, 700));
        assert!(matches!(
            proc.process(&req),
            Err(RequestError::Alignment { len: 700, .. })
        ));
        assert_eq!(page.dcache_flushes(), 0);
        assert!(proc.store().read(0, 1024).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn segment_past_region_end_is_rejected() {
        let proc = processor(16);
        let page = Arc::new(Page::new());
        let req = IoRequest::read(0).with_segment(Segment::new(page, 3584, 1024));
        assert_eq!(
            proc.process(&req).unwrap_err(),
            RequestError::RegionOverrun {
                index: 0,
                offset: 3584,
                len: 1024,
                region_len: 4096
            }
        );
    }

    #[test]
    fn out_of_range_segment_reports_storage_error() {
        let proc = processor(8);
        let page = Arc::new(Page::filled(1));
        let req = IoRequest::write(7).with_segment(Segment::new(page, 0, 1024));
        let err = proc.process(&req).unwrap_err();
        assert!(err.is_out_of_range(), "{err}");
        assert!(proc.store().read(7, 512).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn handle_signals_completion_through_callback() {
        let proc = processor(8);
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        let req = IoRequest::write(8)
            .with_segment(Segment::whole(Arc::new(Page::new())))
            .on_complete(move |c| *sink.lock().unwrap() = Some(c));
        assert_eq!(proc.handle(req), Completion::IoError);
        assert_eq!(*seen.lock().unwrap(), Some(Completion::IoError));
    }

    #[test]
    fn empty_request_succeeds() {
        let proc = processor(8);
        assert_eq!(proc.handle(IoRequest::read(0)), Completion::Success);
    }

    #[test]
    fn rw_page_roundtrips_and_marks_page_uptodate() {
        let proc = processor(64);
        let src = Page::filled(0x3C);
        proc.rw_page(8, &src, Direction::Write).unwrap();
        assert!(!src.has_error());

        let dst = Page::new();
        proc.rw_page(8, &dst, Direction::Read).unwrap();
        assert!(dst.is_uptodate());
        assert_eq!(dst.to_vec(), src.to_vec());
        assert_eq!(dst.dcache_flushes(), 1);
    }

    #[test]
    fn rw_page_beyond_capacity_flags_page_error() {
        let proc = processor(8);
        let page = Page::new();
        let err = proc.rw_page(4, &page, Direction::Read).unwrap_err();
        assert!(err.is_out_of_range());
        assert!(page.has_error());
        assert!(!page.is_uptodate());
    }

    #[test]
    fn compound_page_is_unsupported_and_untouched() {
        let proc = processor(64);
        let huge = Page::with_order(1);
        let err = proc.rw_page(0, &huge, Direction::Read).unwrap_err();
        assert!(matches!(err, RequestError::Unsupported(_)));
        assert!(!huge.is_uptodate());
        assert!(!huge.has_error());
        assert_eq!(huge.dcache_flushes(), 0);

        let err = proc
            .handle_single_region(&huge, 512, 0, Direction::Write, 0)
            .unwrap_err();
        assert!(matches!(err, RequestError::Unsupported(_)));
    }
}
