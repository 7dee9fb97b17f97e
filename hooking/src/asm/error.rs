use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssemblyError>;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Could not decode instruction at offset {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    #[error("Disassembler reported an empty instruction at offset {0}")]
    EmptyInstruction(usize),

    #[error("Jump from {from:#x} to {to:#x} does not fit a 32 bit displacement")]
    DisplacementOverflow { from: usize, to: usize },

    #[error("{0} bit mode has no absolute jump encoding")]
    UnsupportedJump(u32),
}
