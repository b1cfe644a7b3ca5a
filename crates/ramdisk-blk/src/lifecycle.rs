use std::sync::Arc;

use ramdisk_storage::BackingStore;

use crate::host::{BlockHost, GenDisk, QueueLimits};
use crate::{DeviceConfig, LifecycleError, RequestProcessor};

/// Name and major number under which a device is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    /// `0` until a dynamic major has been assigned by the host.
    pub major: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Memory is allocated; the host does not know about the device yet.
    Allocated,
    /// Registered and visible; requests are being routed to the processor.
    Published,
    /// Unpublished and its memory released. Terminal.
    Released,
}

/// An allocated device and everything needed to publish or tear it down.
#[derive(Debug)]
pub struct DeviceHandle {
    identity: DeviceIdentity,
    capacity_sectors: u64,
    limits: QueueLimits,
    store: Arc<BackingStore>,
    processor: Arc<RequestProcessor>,
    state: DeviceState,
}

impl DeviceHandle {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn major(&self) -> u32 {
        self.identity.major
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == DeviceState::Published
    }

    pub fn store(&self) -> &Arc<BackingStore> {
        &self.store
    }

    pub fn processor(&self) -> &Arc<RequestProcessor> {
        &self.processor
    }

    fn release(&mut self) {
        self.store.release();
        self.state = DeviceState::Released;
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.is_registered() {
            tracing::warn!(
                name = %self.identity.name,
                major = self.identity.major,
                "device handle dropped while still published"
            );
        }
    }
}

/// Allocates, publishes and tears down devices against one host.
pub struct DeviceLifecycle {
    host: Arc<dyn BlockHost>,
    config: DeviceConfig,
}

impl DeviceLifecycle {
    pub fn new(host: Arc<dyn BlockHost>, config: DeviceConfig) -> Result<Self, LifecycleError> {
        config.validate()?;
        Ok(Self { host, config })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Builds a zeroed store of `capacity_sectors` sectors and a handle for it.
    pub fn allocate(&self, capacity_sectors: u64) -> Result<DeviceHandle, LifecycleError> {
        let store = BackingStore::with_chunk_size(capacity_sectors, self.config.chunk_size)
            .map_err(|source| LifecycleError::Allocation {
                name: self.config.name.clone(),
                source,
            })?;
        let store = Arc::new(store);
        let processor = Arc::new(RequestProcessor::new(Arc::clone(&store)));

        Ok(DeviceHandle {
            identity: DeviceIdentity {
                name: self.config.name.clone(),
                major: self.config.major,
            },
            capacity_sectors,
            limits: QueueLimits::memory_backed(self.config.physical_block_size),
            store,
            processor,
            state: DeviceState::Allocated,
        })
    }

    /// [`allocate`](Self::allocate) with the capacity derived from the configured size.
    pub fn allocate_from_config(&self) -> Result<DeviceHandle, LifecycleError> {
        self.allocate(self.config.capacity_sectors())
    }

    /// Registers the identity, then the disk. On refusal the partial registration is undone
    /// and the store released before returning.
    pub fn publish(&self, handle: &mut DeviceHandle) -> Result<(), LifecycleError> {
        if handle.state != DeviceState::Allocated {
            return Err(LifecycleError::InvalidState {
                name: handle.identity.name.clone(),
                state: handle.state,
            });
        }

        match self.register(handle) {
            Ok(()) => {
                handle.state = DeviceState::Published;
                tracing::info!(
                    name = %handle.identity.name,
                    major = handle.identity.major,
                    capacity_sectors = handle.capacity_sectors,
                    "module loaded"
                );
                Ok(())
            }
            Err(err) => {
                handle.release();
                tracing::warn!(name = %handle.identity.name, error = %err, "module NOT loaded");
                Err(err)
            }
        }
    }

    fn register(&self, handle: &mut DeviceHandle) -> Result<(), LifecycleError> {
        let name = handle.identity.name.clone();
        let registration = |source| LifecycleError::Registration {
            name: name.clone(),
            source,
        };

        let major = self
            .host
            .register_blkdev(handle.identity.major, &name)
            .map_err(registration)?;

        let disk = GenDisk {
            name: name.clone(),
            major,
            first_minor: 0,
            minors: 1,
            capacity_sectors: handle.capacity_sectors,
            limits: handle.limits,
            fops: handle.processor.clone(),
        };
        if let Err(source) = self.host.add_disk(disk) {
            self.host.unregister_blkdev(major, &name);
            return Err(registration(source));
        }

        handle.identity.major = major;
        Ok(())
    }

    /// Removes the disk, unregisters the identity, then releases the store. Does nothing for
    /// a handle that is not currently published.
    pub fn teardown(&self, handle: &mut DeviceHandle) {
        if handle.state != DeviceState::Published {
            return;
        }
        let DeviceIdentity { name, major } = handle.identity.clone();
        self.host.del_disk(&name);
        self.host.unregister_blkdev(major, &name);
        handle.release();
        tracing::info!(name = %name, major, "module unloaded");
    }
}

impl std::fmt::Debug for DeviceLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLifecycle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
