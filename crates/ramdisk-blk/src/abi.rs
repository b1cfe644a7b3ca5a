//! Submit entry points for the two host request ABIs.
//!
//! Older hosts expect the submit hook to hand back a queue cookie; newer ones expect nothing.
//! Both shims run the same request path, so behaviour does not depend on which one the host
//! picks.

use crate::host::BlockDeviceOperations;
use crate::IoRequest;

/// Which submit signature the host calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostAbi {
    #[default]
    Current,
    Legacy,
}

/// Queue cookie returned by the legacy submit hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCookie(pub u32);

impl QueueCookie {
    /// The request was completed inline and there is nothing to poll for.
    pub const NONE: QueueCookie = QueueCookie(u32::MAX);
}

pub fn submit_bio(ops: &dyn BlockDeviceOperations, request: IoRequest) {
    ops.submit_bio(request);
}

pub fn submit_bio_legacy(ops: &dyn BlockDeviceOperations, request: IoRequest) -> QueueCookie {
    ops.submit_bio(request);
    QueueCookie::NONE
}
