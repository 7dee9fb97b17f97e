use super::{ABS_JMP_LENGTH, Architecture, AssemblyError, REL_JMP_LENGTH, Result, pointer_distance};

/// Encodes the two jump shapes a hook needs and decides between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpCodec {
    architecture: Architecture,
}

impl JumpCodec {
    pub const fn new(architecture: Architecture) -> Self {
        Self { architecture }
    }

    pub const fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Whether a `jmp rel32` placed at `from` is unable to reach `to`.
    pub fn needs_absolute(&self, from: usize, to: usize) -> bool {
        if !self.architecture.supports_absolute_jump() {
            return false;
        }
        // The displacement is relative to the end of the jump
        pointer_distance(from.wrapping_add(REL_JMP_LENGTH), to) > self.architecture.max_displacement()
    }

    /// `jmp rel32` located at `from`.
    pub fn encode_relative(&self, from: usize, to: usize) -> Result<[u8; REL_JMP_LENGTH]> {
        let next = from.wrapping_add(REL_JMP_LENGTH);

        let displacement = match self.architecture {
            Architecture::X86 => (to as u32).wrapping_sub(next as u32) as i32,
            Architecture::X86_64 => {
                if self.needs_absolute(from, to) {
                    return Err(AssemblyError::DisplacementOverflow { from, to });
                }
                to.wrapping_sub(next) as isize as i32
            }
        };

        let mut bytes = [0u8; REL_JMP_LENGTH];
        bytes[0] = 0xE9;
        bytes[1..].copy_from_slice(&displacement.to_le_bytes());
        Ok(bytes)
    }

    /// `mov rax, imm64; jmp rax`. Position independent.
    pub fn encode_absolute(&self, to: usize) -> Result<[u8; ABS_JMP_LENGTH]> {
        if !self.architecture.supports_absolute_jump() {
            return Err(AssemblyError::UnsupportedJump(self.architecture.bitness()));
        }

        let mut bytes = [0u8; ABS_JMP_LENGTH];
        bytes[0] = 0x48;
        bytes[1] = 0xB8;
        bytes[2..10].copy_from_slice(&(to as u64).to_le_bytes());
        bytes[10] = 0xFF;
        bytes[11] = 0xE0;
        Ok(bytes)
    }

    /// Length of the jump [`encode_jump`](Self::encode_jump) would produce.
    pub fn jump_length(&self, from: usize, to: usize) -> usize {
        if self.needs_absolute(from, to) {
            ABS_JMP_LENGTH
        } else {
            REL_JMP_LENGTH
        }
    }

    /// The shortest jump from `from` that reaches `to`.
    pub fn encode_jump(&self, from: usize, to: usize) -> Result<Vec<u8>> {
        if self.needs_absolute(from, to) {
            Ok(self.encode_absolute(to)?.to_vec())
        } else {
            Ok(self.encode_relative(from, to)?.to_vec())
        }
    }
}
