//! The interface the device consumes from the host block layer, plus an in-process host.
//!
//! [`BlockHost`] is everything the lifecycle needs to register and publish a disk.
//! [`BlockDeviceOperations`] is the operations table the host calls once a disk is live.
//! [`HostRegistry`] is an in-process stand-in for the host side, used by tests and tools to
//! drive devices end to end. It routes requests to published disks by name and hands out
//! majors; it does no queueing, scheduling or partition scanning of its own.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::abi::{self, HostAbi};
use crate::{Completion, Direction, IoRequest, MemoryRegion, RequestError, RequestProcessor};

/// Dynamic majors are handed out from the top of this range downwards.
pub const DYNAMIC_MAJOR_MAX: u32 = 254;
pub const DYNAMIC_MAJOR_MIN: u32 = 234;

/// Upper bound on disk names, including room for a partition suffix.
pub const DISK_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("major {major} is already registered to {owner}")]
    MajorInUse { major: u32, owner: String },

    #[error("no free dynamic major in {DYNAMIC_MAJOR_MIN}..={DYNAMIC_MAJOR_MAX}")]
    NoFreeMajor,

    #[error("major {0} is not registered")]
    UnknownMajor(u32),

    #[error("disk {0} already exists")]
    DiskExists(String),

    #[error("no disk named {0}")]
    NoSuchDisk(String),
}

/// Request-queue hints published with a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    /// Non-rotational: no seek penalty, so the host should not reorder for locality.
    pub nonrot: bool,
    /// Whether request timings feed the host entropy pool.
    pub add_random: bool,
}

impl QueueLimits {
    /// Limits for a memory-backed disk.
    pub fn memory_backed(physical_block_size: u32) -> Self {
        Self {
            logical_block_size: ramdisk_storage::SECTOR_SIZE as u32,
            physical_block_size,
            nonrot: true,
            add_random: false,
        }
    }
}

/// Operations table installed for a published disk.
pub trait BlockDeviceOperations: Send + Sync {
    fn submit_bio(&self, request: IoRequest) -> Completion;

    fn rw_page(
        &self,
        sector: u64,
        page: &dyn MemoryRegion,
        direction: Direction,
    ) -> Result<(), RequestError>;
}

impl BlockDeviceOperations for RequestProcessor {
    fn submit_bio(&self, request: IoRequest) -> Completion {
        self.handle(request)
    }

    fn rw_page(
        &self,
        sector: u64,
        page: &dyn MemoryRegion,
        direction: Direction,
    ) -> Result<(), RequestError> {
        RequestProcessor::rw_page(self, sector, page, direction)
    }
}

/// Everything the host needs to expose a disk.
#[derive(Clone)]
pub struct GenDisk {
    pub name: String,
    pub major: u32,
    pub first_minor: u32,
    pub minors: u32,
    pub capacity_sectors: u64,
    pub limits: QueueLimits,
    pub fops: Arc<dyn BlockDeviceOperations>,
}

impl fmt::Debug for GenDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenDisk")
            .field("name", &self.name)
            .field("major", &self.major)
            .field("first_minor", &self.first_minor)
            .field("minors", &self.minors)
            .field("capacity_sectors", &self.capacity_sectors)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Registration side of the host block layer.
pub trait BlockHost: Send + Sync {
    /// Claims `major` for `name`; `0` asks the host to pick a free dynamic major. Returns the
    /// major actually registered.
    fn register_blkdev(&self, major: u32, name: &str) -> Result<u32, HostError>;

    fn unregister_blkdev(&self, major: u32, name: &str);

    /// Makes `disk` visible; requests may be routed to it as soon as this returns.
    fn add_disk(&self, disk: GenDisk) -> Result<(), HostError>;

    /// Stops routing to the named disk.
    fn del_disk(&self, name: &str);
}

#[derive(Debug, Default)]
struct Registry {
    majors: BTreeMap<u32, String>,
    disks: HashMap<String, Arc<GenDisk>>,
}

/// In-process stand-in for the host block layer. Requests run synchronously on the caller's
/// thread.
#[derive(Debug, Default)]
pub struct HostRegistry {
    abi: HostAbi,
    inner: RwLock<Registry>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that calls into disks through the given submit ABI.
    pub fn with_abi(abi: HostAbi) -> Self {
        Self {
            abi,
            inner: RwLock::default(),
        }
    }

    pub fn abi(&self) -> HostAbi {
        self.abi
    }

    pub fn disk(&self, name: &str) -> Option<Arc<GenDisk>> {
        self.read().disks.get(name).cloned()
    }

    pub fn disk_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().disks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn major_owner(&self, major: u32) -> Option<String> {
        self.read().majors.get(&major).cloned()
    }

    /// Delivers `request` to the named disk. The outcome reaches the submitter through the
    /// request's completion callback, which also runs with `IoError` when no such disk exists.
    pub fn submit_bio(&self, name: &str, request: IoRequest) -> Result<(), HostError> {
        let disk = match self.lookup(name) {
            Ok(disk) => disk,
            Err(err) => {
                request.complete(Completion::IoError);
                return Err(err);
            }
        };
        match self.abi {
            HostAbi::Current => abi::submit_bio(&*disk.fops, request),
            HostAbi::Legacy => {
                let _cookie = abi::submit_bio_legacy(&*disk.fops, request);
            }
        }
        Ok(())
    }

    /// Single-page transfer against the named disk.
    pub fn rw_page(
        &self,
        name: &str,
        sector: u64,
        page: &dyn MemoryRegion,
        direction: Direction,
    ) -> Result<Completion, HostError> {
        let disk = self.lookup(name)?;
        Ok(match disk.fops.rw_page(sector, page, direction) {
            Ok(()) => Completion::Success,
            Err(_) => Completion::IoError,
        })
    }

    fn lookup(&self, name: &str) -> Result<Arc<GenDisk>, HostError> {
        // Clone out of the map so the request runs without holding the registry lock.
        self.disk(name)
            .ok_or_else(|| HostError::NoSuchDisk(name.to_string()))
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlockHost for HostRegistry {
    fn register_blkdev(&self, major: u32, name: &str) -> Result<u32, HostError> {
        let mut reg = self.write();
        let major = if major == 0 {
            (DYNAMIC_MAJOR_MIN..=DYNAMIC_MAJOR_MAX)
                .rev()
                .find(|m| !reg.majors.contains_key(m))
                .ok_or(HostError::NoFreeMajor)?
        } else if let Some(owner) = reg.majors.get(&major) {
            return Err(HostError::MajorInUse {
                major,
                owner: owner.clone(),
            });
        } else {
            major
        };
        reg.majors.insert(major, name.to_string());
        tracing::debug!(major, name, "registered block major");
        Ok(major)
    }

    fn unregister_blkdev(&self, major: u32, name: &str) {
        let mut reg = self.write();
        match reg.majors.get(&major) {
            Some(owner) if owner == name => {
                reg.majors.remove(&major);
                tracing::debug!(major, name, "unregistered block major");
            }
            owner => tracing::warn!(major, name, ?owner, "unregister of a major not owned by caller"),
        }
    }

    fn add_disk(&self, disk: GenDisk) -> Result<(), HostError> {
        let mut reg = self.write();
        if !reg.majors.contains_key(&disk.major) {
            return Err(HostError::UnknownMajor(disk.major));
        }
        if reg.disks.contains_key(&disk.name) {
            return Err(HostError::DiskExists(disk.name));
        }
        tracing::debug!(
            name = %disk.name,
            major = disk.major,
            capacity_sectors = disk.capacity_sectors,
            "disk added"
        );
        reg.disks.insert(disk.name.clone(), Arc::new(disk));
        Ok(())
    }

    fn del_disk(&self, name: &str) {
        if self.write().disks.remove(name).is_some() {
            tracing::debug!(name, "disk removed");
        }
    }
}
