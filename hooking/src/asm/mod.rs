pub mod inner {
    pub mod x86_64;
    pub use x86_64::*;

    pub use x86_64::IcedDisassembler as DisassemblerImpl;
}

pub mod error;
pub mod jump;
pub mod resolver;

pub use error::{AssemblyError, Result};
pub use jump::JumpCodec;
pub use resolver::resolve_stolen_length;

pub type DefaultDisassembler = inner::DisassemblerImpl;

/// Length of `jmp rel32`.
pub const REL_JMP_LENGTH: usize = 5;

/// Length of `mov rax, imm64; jmp rax`.
pub const ABS_JMP_LENGTH: usize = 12;

/// Smallest patch able to redirect control flow.
pub const MIN_LENGTH: usize = REL_JMP_LENGTH;

pub const MAX_INSTRUCTION_LENGTH: usize = 15;

/// Reach of a signed 32 bit displacement.
pub const REL_JMP_DISTANCE: u64 = i32::MAX as u64;

/// Machine mode the jumps are encoded for and the prologue is decoded in.
///
/// This is a runtime value rather than a `cfg` so both strategies can be
/// exercised from the same host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 32 bit protected mode. Every address is reachable with `jmp rel32`
    /// since displacements wrap around the address space.
    X86,
    /// Long mode. Relative jumps only cover +/- 2 GiB, anything further needs
    /// an absolute jump.
    X86_64,
}

impl Architecture {
    pub const fn host() -> Self {
        #[cfg(target_pointer_width = "64")]
        let arch = Self::X86_64;

        #[cfg(target_pointer_width = "32")]
        let arch = Self::X86;

        arch
    }

    pub const fn bitness(self) -> u32 {
        match self {
            Self::X86 => 32,
            Self::X86_64 => 64,
        }
    }

    pub const fn supports_absolute_jump(self) -> bool {
        matches!(self, Self::X86_64)
    }

    /// Largest distance between two addresses that still counts as
    /// reachable. On 32 bit this is the whole address space.
    pub const fn max_displacement(self) -> u64 {
        match self {
            Self::X86 => u32::MAX as u64,
            Self::X86_64 => REL_JMP_DISTANCE,
        }
    }

    /// Size of the longest jump this mode may ever need.
    pub const fn worst_case_jump_length(self) -> usize {
        if self.supports_absolute_jump() {
            ABS_JMP_LENGTH
        } else {
            REL_JMP_LENGTH
        }
    }

    pub fn is_reachable(self, a: usize, b: usize) -> bool {
        pointer_distance(a, b) <= self.max_displacement()
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Self::host()
    }
}

pub fn pointer_distance(a: usize, b: usize) -> u64 {
    a.abs_diff(b) as u64
}

/// Bytes consumed by the next instruction, the only thing the hook needs to
/// know about machine code.
pub trait LengthDisassembler {
    fn next_instruction_length(&self, bytes: &[u8], architecture: Architecture) -> Result<usize>;
}

impl<D: LengthDisassembler + ?Sized> LengthDisassembler for &D {
    fn next_instruction_length(&self, bytes: &[u8], architecture: Architecture) -> Result<usize> {
        (**self).next_instruction_length(bytes, architecture)
    }
}
