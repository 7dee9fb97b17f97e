mod common;

use common::SimulatedMemory;
use hooking::asm::{self, Architecture, DefaultDisassembler, MIN_LENGTH};
use proptest::prelude::*;

/// Prologue instructions of various lengths, all valid in long mode.
const MENU: &[&[u8]] = &[
    &[0x90],                   // nop
    &[0x55],                   // push rbp
    &[0x41, 0x54],             // push r12
    &[0x31, 0xC0],             // xor eax, eax
    &[0x48, 0x89, 0xE5],       // mov rbp, rsp
    &[0x48, 0x83, 0xEC, 0x20], // sub rsp, 0x20
    &[0x48, 0x8D, 0x4A, 0x08], // lea rcx, [rdx + 8]
    &[0xB8, 0x2A, 0x00, 0x00, 0x00], // mov eax, 42
    &[0x48, 0xB8, 1, 2, 3, 4, 5, 6, 7, 8], // mov rax, imm64
];

const ADDRESS: usize = 0x4000_0000;

proptest! {
    #[test]
    fn stolen_length_ends_on_the_first_boundary_past_a_jump(
        picks in prop::collection::vec(0..MENU.len(), 1..8),
    ) {
        let memory = SimulatedMemory::new(true);
        let mut code = Vec::new();
        for &pick in &picks {
            code.extend_from_slice(MENU[pick]);
        }
        memory.load(ADDRESS, &code);

        let length = unsafe {
            asm::resolve_stolen_length(
                &memory,
                &DefaultDisassembler::new(),
                ADDRESS,
                Architecture::X86_64,
                MIN_LENGTH,
            )
        }
        .unwrap();

        // Anything past the sequence reads back as single byte int3s
        let mut expected = 0;
        let mut lengths = picks.iter().map(|&pick| MENU[pick].len()).chain(std::iter::repeat(1));
        while expected < MIN_LENGTH {
            expected += lengths.next().unwrap();
        }

        prop_assert_eq!(length, expected);
        prop_assert!(length >= MIN_LENGTH);
    }
}
