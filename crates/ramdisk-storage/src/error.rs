use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors reported by [`crate::BackingStore`].
///
/// Callers are expected to validate requests before they reach the store, so none of these
/// fire on a well-formed request. The store still refuses rather than touching bytes outside
/// the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unaligned buffer length {len} (expected multiple of {alignment})")]
    UnalignedLength { len: usize, alignment: usize },

    #[error("out of range: sector={sector} len={len} capacity={capacity}")]
    OutOfRange {
        sector: u64,
        len: usize,
        capacity: u64,
    },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("cannot allocate backing store of {size_bytes} bytes: {reason}")]
    Allocation {
        size_bytes: u64,
        reason: &'static str,
    },

    /// The store was released (device torn down) while a caller still held it.
    #[error("backing store has been released")]
    Released,
}
