use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Page pool state is poisoned")]
    BadPoolState,

    #[error("Failed to allocate page memory at {0:#x}")]
    CantAllocate(usize),

    #[error("Failed to release page memory at {0:#x}")]
    CantRelease(usize),

    #[error("Failed to set memroy protection. Address: {0:x}")]
    CantSetMemoryProtection(usize),

    #[error("No page within reach of {preferred:#x} could be mapped")]
    NoReachableMemory { preferred: usize },

    #[error("Regions can only shrink. Has: {has} | Requested: {requested}")]
    RegionGrowth { has: usize, requested: usize },

    #[error("Cant open memory of process {pid}")]
    CantOpenProcess {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Cant access {length} bytes at {address:#x}")]
    CantAccess {
        address: usize,
        length: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Address is not usable for this situation: {0:#x}")]
    BadAdress(usize),
}
