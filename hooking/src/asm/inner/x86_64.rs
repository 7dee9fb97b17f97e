use iced_x86::{Decoder, DecoderError, DecoderOptions};

use super::super::*;

/// Length decoding backed by iced-x86.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcedDisassembler;

impl IcedDisassembler {
    pub const fn new() -> Self {
        Self
    }
}

impl LengthDisassembler for IcedDisassembler {
    fn next_instruction_length(&self, bytes: &[u8], architecture: Architecture) -> Result<usize> {
        let mut decoder = Decoder::new(architecture.bitness(), bytes, DecoderOptions::NONE);

        if !decoder.can_decode() {
            return Err(AssemblyError::Decode {
                offset: 0,
                reason: "no bytes left".into(),
            });
        }

        let instr = decoder.decode();
        match decoder.last_error() {
            DecoderError::None if !instr.is_invalid() => Ok(instr.len()),
            error => Err(AssemblyError::Decode {
                offset: 0,
                reason: format!("{error:?}"),
            }),
        }
    }
}
