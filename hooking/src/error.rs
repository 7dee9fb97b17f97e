use thiserror::Error;

use crate::asm::AssemblyError;
use crate::mem::MemoryError;

pub type Result<T> = std::result::Result<T, HookingError>;

#[derive(Debug, Error)]
pub enum HookingError {
    #[error("Stolen length {length} cannot hold a {minimum} byte jump")]
    InsufficientLength { length: usize, minimum: usize },

    #[error("No executable memory could be mapped within reach of {preferred:#x}")]
    OutOfMemory { preferred: usize },

    #[error("Jump from {from:#x} to {to:#x} exceeds the relative displacement range")]
    DisplacementOverflow { from: usize, to: usize },

    #[error("Memory error")]
    MemoryError(#[source] MemoryError),

    #[error("Assembly error")]
    AssemblyError(#[source] AssemblyError),
}

impl From<MemoryError> for HookingError {
    fn from(error: MemoryError) -> Self {
        match error {
            MemoryError::NoReachableMemory { preferred } => Self::OutOfMemory { preferred },
            other => Self::MemoryError(other),
        }
    }
}

impl From<AssemblyError> for HookingError {
    fn from(error: AssemblyError) -> Self {
        match error {
            AssemblyError::DisplacementOverflow { from, to } => {
                Self::DisplacementOverflow { from, to }
            }
            other => Self::AssemblyError(other),
        }
    }
}
