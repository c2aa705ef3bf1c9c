//! Allocation errors and the status codes they map to.

use kernel_memory_addresses::PhysicalAddress;

/// Why an allocator operation was refused.
///
/// None of these is fatal: every allocator reports the condition to its
/// immediate caller and leaves its own state unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// A size, length, count or alignment the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A bit index outside the bitmap's extent.
    #[error("index {index} out of range for bitmap of {units} units")]
    OutOfRange { index: usize, units: usize },
    /// No free run of the requested size exists.
    #[error("out of memory")]
    OutOfMemory,
    /// The address is not the start of a live allocation.
    #[error("invalid free of {0}")]
    InvalidFree(PhysicalAddress),
    /// The process-wide allocator has not been set up by `mem_init` yet.
    #[error("memory subsystem not initialized")]
    NotInitialized,
    /// `mem_init` ran before.
    #[error("memory subsystem already initialized")]
    AlreadyInitialized,
}

/// Status code for the C-style interface (`pmalloc`/`pfree` callers that
/// cannot take a `Result`).
///
/// `Ok` is zero, every failure is negative.
///
/// ```rust
/// use kernel_alloc::{AllocError, Status};
///
/// assert_eq!(Status::from_result(&Ok::<_, AllocError>(())), Status::Ok);
/// assert_eq!(Status::from(AllocError::OutOfMemory).code(), -3);
/// assert!(Status::HardwareUnsupported.is_err());
/// ```
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    InvalidArgument = -1,
    OutOfRange = -2,
    OutOfMemory = -3,
    InvalidFree = -4,
    NotInitialized = -5,
    AlreadyInitialized = -6,
    /// Reserved for CPU capability checks; the allocators never report it.
    HardwareUnsupported = -7,
}

impl Status {
    #[must_use]
    pub fn from_result<T>(result: &Result<T, AllocError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => Self::from(*e),
        }
    }

    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn is_err(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

impl From<AllocError> for Status {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::InvalidArgument(_) => Self::InvalidArgument,
            AllocError::OutOfRange { .. } => Self::OutOfRange,
            AllocError::OutOfMemory => Self::OutOfMemory,
            AllocError::InvalidFree(_) => Self::InvalidFree,
            AllocError::NotInitialized => Self::NotInitialized,
            AllocError::AlreadyInitialized => Self::AlreadyInitialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_maps_to_a_distinct_negative_code() {
        let errors = [
            AllocError::InvalidArgument("x"),
            AllocError::OutOfRange { index: 9, units: 8 },
            AllocError::OutOfMemory,
            AllocError::InvalidFree(PhysicalAddress::new(0x10)),
            AllocError::NotInitialized,
            AllocError::AlreadyInitialized,
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| Status::from(*e).code()).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&Status::HardwareUnsupported.code()));
    }

    #[test]
    fn messages_name_the_offending_value() {
        let e = AllocError::OutOfRange { index: 9, units: 8 };
        assert_eq!(e.to_string(), "index 9 out of range for bitmap of 8 units");
        let e = AllocError::InvalidFree(PhysicalAddress::new(0x10));
        assert_eq!(e.to_string(), "invalid free of 0x0000000000000010");
    }
}
