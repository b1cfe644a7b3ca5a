//! Block-device front end for a [`ramdisk_storage::BackingStore`].
//!
//! - [`IoRequest`] / [`Segment`] / [`MemoryRegion`]: the request model the host hands in.
//! - [`RequestProcessor`]: applies requests to the store and reports [`Completion`].
//! - [`BlockHost`] / [`HostRegistry`]: the host-side registration interface and an
//!   in-process implementation of it.
//! - [`DeviceLifecycle`]: allocate, publish and tear down a device.
//!
//! There is no global device. Each [`DeviceHandle`] owns its store, so any number of
//! independent devices can coexist on one host.

pub mod abi;
mod config;
mod error;
pub mod host;
mod lifecycle;
mod page;
mod processor;
mod request;

pub use abi::{HostAbi, QueueCookie};
pub use config::{ConfigError, DeviceConfig, DEFAULT_NAME, DEFAULT_SIZE_BYTES};
pub use error::{LifecycleError, RequestError};
pub use host::{BlockDeviceOperations, BlockHost, GenDisk, HostError, HostRegistry, QueueLimits};
pub use lifecycle::{DeviceHandle, DeviceIdentity, DeviceLifecycle, DeviceState};
pub use page::{MemoryRegion, Page, PAGE_SIZE};
pub use processor::RequestProcessor;
pub use request::{Completion, Direction, EndIo, IoRequest, Segment};

pub use ramdisk_storage::{BackingStore, StoreError, SECTOR_SIZE};
