use super::{Architecture, AssemblyError, LengthDisassembler, MAX_INSTRUCTION_LENGTH};
use crate::mem::MemoryAccessor;

/// Number of prologue bytes at `address` that have to be relocated so a
/// patch of `minimum` bytes never cuts an instruction in half.
///
/// # Safety
/// `address` must be readable through `memory` for as long as instructions
/// are being decoded.
pub unsafe fn resolve_stolen_length<M, D>(
    memory: &M,
    disassembler: &D,
    address: usize,
    architecture: Architecture,
    minimum: usize,
) -> crate::Result<usize>
where
    M: MemoryAccessor + ?Sized,
    D: LengthDisassembler + ?Sized,
{
    let mut buffer = [0u8; MAX_INSTRUCTION_LENGTH];
    let mut length = 0;

    while length < minimum {
        unsafe { memory.read(address + length, &mut buffer)? };

        let instruction_length = disassembler
            .next_instruction_length(&buffer, architecture)
            .map_err(|error| match error {
                AssemblyError::Decode { reason, .. } => AssemblyError::Decode {
                    offset: length,
                    reason,
                },
                other => other,
            })?;

        if instruction_length == 0 {
            return Err(AssemblyError::EmptyInstruction(length).into());
        }
        length += instruction_length;
    }

    tracing::trace!("Resolved {length} stolen bytes at {address:#x}");
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{DefaultDisassembler, MIN_LENGTH, Result};
    use crate::mem::MemoryError;

    struct SliceMemory {
        base: usize,
        bytes: Vec<u8>,
    }

    impl MemoryAccessor for SliceMemory {
        fn requires_protection(&self) -> bool {
            false
        }

        fn page_granularity(&self) -> usize {
            0x1000
        }

        unsafe fn read(&self, address: usize, buffer: &mut [u8]) -> crate::mem::Result<()> {
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = *self
                    .bytes
                    .get(address - self.base + i)
                    .unwrap_or(&0xCC);
            }
            Ok(())
        }

        unsafe fn write(&self, address: usize, _data: &[u8]) -> crate::mem::Result<()> {
            Err(MemoryError::BadAdress(address))
        }
    }

    struct FixedLength(usize);

    impl LengthDisassembler for FixedLength {
        fn next_instruction_length(&self, _bytes: &[u8], _: Architecture) -> Result<usize> {
            Ok(self.0)
        }
    }

    #[test]
    fn stops_on_the_first_boundary_past_the_minimum() {
        // push rbp; mov rbp, rsp; sub rsp, 0x20; ret
        let memory = SliceMemory {
            base: 0x4000,
            bytes: vec![0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x20, 0xC3],
        };
        let length = unsafe {
            resolve_stolen_length(
                &memory,
                &DefaultDisassembler::new(),
                0x4000,
                Architecture::X86_64,
                MIN_LENGTH,
            )
        }
        .unwrap();
        assert_eq!(length, 8);
    }

    #[test]
    fn exact_fit_is_not_extended() {
        // mov eax, 1; ret
        let memory = SliceMemory {
            base: 0x4000,
            bytes: vec![0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3],
        };
        let length = unsafe {
            resolve_stolen_length(
                &memory,
                &DefaultDisassembler::new(),
                0x4000,
                Architecture::X86,
                MIN_LENGTH,
            )
        }
        .unwrap();
        assert_eq!(length, 5);
    }

    #[test]
    fn zero_length_instruction_is_rejected() {
        let memory = SliceMemory {
            base: 0,
            bytes: Vec::new(),
        };
        let result = unsafe {
            resolve_stolen_length(&memory, &FixedLength(0), 0, Architecture::X86_64, MIN_LENGTH)
        };
        assert!(matches!(
            result,
            Err(crate::HookingError::AssemblyError(AssemblyError::EmptyInstruction(0)))
        ));
    }

    #[test]
    fn undecodable_bytes_report_their_offset() {
        // push rbp; push es (invalid in long mode)
        let memory = SliceMemory {
            base: 0x10,
            bytes: vec![0x55, 0x06, 0x90, 0x90, 0x90, 0x90],
        };
        let result = unsafe {
            resolve_stolen_length(
                &memory,
                &DefaultDisassembler::new(),
                0x10,
                Architecture::X86_64,
                MIN_LENGTH,
            )
        };
        assert!(matches!(
            result,
            Err(crate::HookingError::AssemblyError(AssemblyError::Decode { offset: 1, .. }))
        ));
    }
}
