use std::fmt;
use std::sync::Arc;

use crate::{MemoryRegion, Page};

/// Transfer direction shared by every segment of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn is_write(self) -> bool {
        matches!(self, Direction::Write)
    }
}

/// Outcome reported to the host for a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    /// Generic I/O error; the reason is not surfaced to the submitter.
    IoError,
}

impl Completion {
    pub fn is_success(self) -> bool {
        matches!(self, Completion::Success)
    }
}

/// One contiguous piece of memory and the sectors it maps to.
#[derive(Clone)]
pub struct Segment {
    region: Arc<dyn MemoryRegion>,
    offset: usize,
    len: usize,
}

impl Segment {
    pub fn new(region: Arc<dyn MemoryRegion>, offset: usize, len: usize) -> Self {
        Self {
            region,
            offset,
            len,
        }
    }

    /// Segment covering all of `page`.
    pub fn whole(page: Arc<Page>) -> Self {
        let len = page.len();
        Self::new(page, 0, len)
    }

    pub fn region(&self) -> &dyn MemoryRegion {
        &*self.region
    }

    /// Byte offset of the segment inside its region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("region_len", &self.region.len())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

pub type EndIo = Box<dyn FnOnce(Completion) + Send>;

/// A block I/O request: a starting sector, one direction and an ordered segment list.
///
/// Requests are built by the host and consumed by the device; the completion callback, if
/// any, runs exactly once when the device finishes with the request.
pub struct IoRequest {
    sector: u64,
    direction: Direction,
    segments: Vec<Segment>,
    end_io: Option<EndIo>,
}

impl IoRequest {
    pub fn new(direction: Direction, sector: u64) -> Self {
        Self {
            sector,
            direction,
            segments: Vec::new(),
            end_io: None,
        }
    }

    pub fn read(sector: u64) -> Self {
        Self::new(Direction::Read, sector)
    }

    pub fn write(sector: u64) -> Self {
        Self::new(Direction::Write, sector)
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn push_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn on_complete(mut self, end_io: impl FnOnce(Completion) + Send + 'static) -> Self {
        self.end_io = Some(Box::new(end_io));
        self
    }

    pub fn sector(&self) -> u64 {
        self.sector
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total payload in bytes across all segments.
    pub fn total_len(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    /// Signals `completion` to the submitter and drops the request.
    pub(crate) fn complete(mut self, completion: Completion) {
        if let Some(end_io) = self.end_io.take() {
            end_io(completion);
        }
    }
}

impl fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoRequest")
            .field("sector", &self.sector)
            .field("direction", &self.direction)
            .field("segments", &self.segments)
            .field("end_io", &self.end_io.is_some())
            .finish()
    }
}
