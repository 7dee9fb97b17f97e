//! Inline function detours for x86 and x86-64.
//!
//! A [`Hook`] overwrites the entry of a function with a 5 byte relative jump
//! to a replacement. The bytes it overwrites are copied into a trampoline
//! next to the original so the old behaviour stays callable. Detours more
//! than 2 GiB away are reached through an absolute jump placed in the same
//! executable region.
//!
//! The engine is written against three seams so it can patch other
//! processes or run on simulated memory:
//! [`MemoryAccessor`](mem::MemoryAccessor),
//! [`RegionAllocator`](mem::RegionAllocator) and
//! [`LengthDisassembler`](asm::LengthDisassembler).
//!
//! ```no_run
//! use hooking::mem::{LocalMemory, PagePool};
//! use hooking::{Hook, HookOptions};
//!
//! extern "C" fn add(a: i32, b: i32) -> i32 {
//!     a + b
//! }
//!
//! extern "C" fn sub(a: i32, b: i32) -> i32 {
//!     a - b
//! }
//!
//! let memory = LocalMemory::new();
//! let pool = PagePool::new();
//! let mut hook = unsafe {
//!     Hook::new(&memory, &pool, add as usize, sub as usize, HookOptions::default())
//! }
//! .unwrap();
//!
//! unsafe { hook.enable().unwrap() };
//! let original: extern "C" fn(i32, i32) -> i32 =
//!     unsafe { std::mem::transmute(hook.trampoline().unwrap()) };
//! assert_eq!(original(2, 3), 5);
//! ```
pub mod asm;
pub mod error;
mod hooks;
pub mod mem;
mod refcounted;

pub use error::{HookingError, Result};
pub use hooks::{Hook, HookOptions, StolenLength};
pub use refcounted::RefCountedHook;
