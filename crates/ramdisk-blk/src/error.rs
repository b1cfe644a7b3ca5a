use ramdisk_storage::StoreError;
use thiserror::Error;

use crate::{ConfigError, DeviceState, HostError};

/// Why a request (or one of its segments) failed.
///
/// Only the processor and its callers see these; the submitter is told
/// [`crate::Completion::IoError`] and nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("segment {index} is not sector aligned: offset={offset} len={len}")]
    Alignment {
        index: usize,
        offset: usize,
        len: usize,
    },

    #[error("segment {index} overruns its memory region: offset={offset} len={len} region_len={region_len}")]
    RegionOverrun {
        index: usize,
        offset: usize,
        len: usize,
        region_len: usize,
    },

    #[error("segment {index}: {source}")]
    Storage {
        index: usize,
        #[source]
        source: StoreError,
    },

    #[error("unsupported request: {0}")]
    Unsupported(&'static str),

    #[error("sector cursor overflowed after segment {index}")]
    SectorOverflow { index: usize },
}

impl RequestError {
    /// True when the backing store refused the range as lying beyond its capacity.
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            RequestError::Storage {
                source: StoreError::OutOfRange { .. } | StoreError::OffsetOverflow,
                ..
            }
        )
    }
}

/// Failures while bringing a device up.
///
/// None of these leave anything behind: by the time the error is returned any partial
/// registration has been undone and the backing memory released.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot allocate device {name}: {source}")]
    Allocation {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot register device {name}: {source}")]
    Registration {
        name: String,
        #[source]
        source: HostError,
    },

    #[error("device {name} is {state:?}; publish needs a freshly allocated device")]
    InvalidState { name: String, state: DeviceState },
}
