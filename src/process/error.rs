//! Process error types
//!
//! Construction errors and steady-state accessor errors are kept apart:
//! a failed construction leaves nothing allocated, while a failed stream
//! lookup leaves the process untouched and usable.

use crate::machine::alloc::AllocError;
use crate::machine::layout::StructError;
use crate::machine::memory::MemoryError;
use std::fmt;

/// Result type for process construction
pub type ProcResult<T> = Result<T, ProcError>;

/// Errors while building a process image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcError {
    /// The segment loader could not load the binary
    LoadFailure(String),
    /// Guest memory is exhausted
    AllocationFailure(AllocError),
    /// Writing the image touched invalid memory
    Memory(MemoryError),
    /// A struct field could not be resolved
    Layout(StructError),
    /// No stream was given and the registry has no default
    MissingStream(&'static str),
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadFailure(msg) => write!(f, "failed loading binary: {}", msg),
            Self::AllocationFailure(e) => write!(f, "allocation failed: {}", e),
            Self::Memory(e) => write!(f, "{}", e),
            Self::Layout(e) => write!(f, "{}", e),
            Self::MissingStream(which) => write!(f, "no default {} stream", which),
        }
    }
}

impl std::error::Error for ProcError {}

impl From<AllocError> for ProcError {
    fn from(e: AllocError) -> Self {
        ProcError::AllocationFailure(e)
    }
}

impl From<MemoryError> for ProcError {
    fn from(e: MemoryError) -> Self {
        ProcError::Memory(e)
    }
}

impl From<StructError> for ProcError {
    fn from(e: StructError) -> Self {
        match e {
            StructError::Memory(e) => ProcError::Memory(e),
            e => ProcError::Layout(e),
        }
    }
}

/// Errors from the current input/output accessors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No stream is registered at the stored block address
    NoStream { b_addr: u32 },
    /// The process has already been torn down
    Freed,
    /// The task block field could not be accessed
    Access(StructError),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStream { b_addr } => write!(f, "no stream at block address {:#x}", b_addr),
            Self::Freed => write!(f, "process already freed"),
            Self::Access(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LookupError {}

impl From<StructError> for LookupError {
    fn from(e: StructError) -> Self {
        LookupError::Access(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProcError::LoadFailure("object not found: c:foo".to_string());
        assert_eq!(err.to_string(), "failed loading binary: object not found: c:foo");

        let err = ProcError::from(AllocError::InvalidSize);
        assert_eq!(err, ProcError::AllocationFailure(AllocError::InvalidSize));

        let err = LookupError::NoStream { b_addr: 0x400 };
        assert_eq!(err.to_string(), "no stream at block address 0x400");
    }

    #[test]
    fn test_struct_error_conversion() {
        let mem = MemoryError::OutOfBounds { address: 8, size: 4 };
        assert_eq!(
            ProcError::from(StructError::Memory(mem.clone())),
            ProcError::Memory(mem)
        );
    }
}
