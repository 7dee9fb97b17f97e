use std::fmt;

use tracing::{debug, error};

use crate::asm::{
    self, Architecture, DefaultDisassembler, JumpCodec, LengthDisassembler, MIN_LENGTH, REL_JMP_LENGTH,
};
use crate::error::{HookingError, Result};
use crate::mem::{
    ExecutableRegion, MemoryAccessor, MemoryProtection, ProtectionGuard, RegionAllocator, align_down,
    align_up,
};

/// How many prologue bytes the hook relocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StolenLength {
    /// Decode instructions until a relative jump fits.
    #[default]
    Disassemble,
    /// Trust the caller. Must end on an instruction boundary.
    Explicit(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookOptions {
    pub stolen_length: StolenLength,
    /// Relocate the stolen bytes so the original stays callable.
    pub trampoline: bool,
    pub architecture: Architecture,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            stolen_length: StolenLength::Disassemble,
            trampoline: true,
            architecture: Architecture::host(),
        }
    }
}

impl HookOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stolen_length(mut self, length: usize) -> Self {
        self.stolen_length = StolenLength::Explicit(length);
        self
    }

    pub fn disassemble(mut self) -> Self {
        self.stolen_length = StolenLength::Disassemble;
        self
    }

    pub fn trampoline(mut self, trampoline: bool) -> Self {
        self.trampoline = trampoline;
        self
    }

    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }
}

/// Where the bytes overwritten by the patch live while the hook exists.
#[derive(Debug)]
enum StolenBytes {
    /// Copied to the start of the trampoline.
    Relocated { trampoline: usize },
    /// Kept here because nobody calls through to the original.
    Saved(Vec<u8>),
}

/// A detour from `original` to `detour`.
///
/// Constructing a hook leaves the original untouched. [`enable`](Self::enable)
/// writes a 5 byte jump over its entry and [`disable`](Self::disable) puts
/// the stolen bytes back. Dropping an enabled hook disables it before its
/// executable region is released.
///
/// Nothing here is synchronised: enabling or disabling while another thread
/// runs through `original` can observe a half written jump.
pub struct Hook<'a, M: MemoryAccessor, A: RegionAllocator> {
    memory: &'a M,
    region: Option<A::Region>,
    original: usize,
    detour: usize,
    stolen_length: usize,
    stolen: StolenBytes,
    indirection: Option<usize>,
    patch: [u8; REL_JMP_LENGTH],
    enabled: bool,
}

impl<'a, M: MemoryAccessor, A: RegionAllocator> Hook<'a, M, A> {
    /// Builds a disabled hook, decoding the prologue with iced-x86 when the
    /// stolen length is not given explicitly.
    ///
    /// # Safety
    /// `original` must point to code of `options.architecture` that is
    /// readable through `memory`, and its first `stolen_length` bytes must
    /// not contain instructions addressing relative to themselves.
    pub unsafe fn new(
        memory: &'a M,
        allocator: &A,
        original: usize,
        detour: usize,
        options: HookOptions,
    ) -> Result<Self> {
        unsafe {
            Self::with_disassembler(
                memory,
                allocator,
                &DefaultDisassembler::new(),
                original,
                detour,
                options,
            )
        }
    }

    /// # Safety
    /// See [`Hook::new`].
    pub unsafe fn with_disassembler<D: LengthDisassembler + ?Sized>(
        memory: &'a M,
        allocator: &A,
        disassembler: &D,
        original: usize,
        detour: usize,
        options: HookOptions,
    ) -> Result<Self> {
        let architecture = options.architecture;
        let codec = JumpCodec::new(architecture);

        let stolen_length = match options.stolen_length {
            StolenLength::Explicit(length) => length,
            StolenLength::Disassemble => unsafe {
                asm::resolve_stolen_length(memory, disassembler, original, architecture, MIN_LENGTH)?
            },
        };
        if stolen_length < MIN_LENGTH {
            return Err(HookingError::InsufficientLength {
                length: stolen_length,
                minimum: MIN_LENGTH,
            });
        }

        let mut stolen_bytes = vec![0u8; stolen_length];
        unsafe { memory.read(original, &mut stolen_bytes)? };

        // A relative jump only covers +/- 2 GiB, further detours go through
        // an absolute jump placed next to the original
        let needs_indirection = codec.needs_absolute(original, detour);

        // Worst case, shrunk once the region address is known
        let mut region_size = 0;
        if needs_indirection {
            region_size += architecture.worst_case_jump_length();
        }
        if options.trampoline {
            region_size += stolen_length + architecture.worst_case_jump_length();
        }

        if region_size == 0 {
            let patch = codec.encode_relative(original, detour)?;
            debug!("Prepared hook {original:#x} -> {detour:#x} without a region");

            return Ok(Self {
                memory,
                region: None,
                original,
                detour,
                stolen_length,
                stolen: StolenBytes::Saved(stolen_bytes),
                indirection: None,
                patch,
                enabled: false,
            });
        }

        let mut region = allocator.get_region(original, region_size, memory.requires_protection())?;
        let from = region.from();

        let mut code = Vec::with_capacity(region_size);
        let mut indirection = None;

        if needs_indirection {
            indirection = Some(from);
            code.extend(codec.encode_jump(from, detour)?);
        }

        let stolen = if options.trampoline {
            let trampoline = from + code.len();
            code.extend_from_slice(&stolen_bytes);

            let resume = original + stolen_length;
            code.extend(codec.encode_jump(from + code.len(), resume)?);

            StolenBytes::Relocated { trampoline }
        } else {
            StolenBytes::Saved(stolen_bytes)
        };

        let patch = codec.encode_relative(original, indirection.unwrap_or(detour))?;

        if code.len() < region.len() {
            region.resize(code.len())?;
        }
        unsafe { memory.write(from, &code)? };
        region.set_writable(false)?;

        debug!(
            "Prepared hook {original:#x} -> {detour:#x}, {stolen_length} stolen bytes, region {from:#x}..{:#x}",
            region.to()
        );

        Ok(Self {
            memory,
            region: Some(region),
            original,
            detour,
            stolen_length,
            stolen,
            indirection,
            patch,
            enabled: false,
        })
    }

    /// Writes the jump to the detour over the original's entry.
    ///
    /// When the memory needs protection changes, the pages holding the patch
    /// are made writable for the write and left `ReadExecute` afterwards,
    /// whatever they were before. [`disable`](Self::disable) does the same.
    ///
    /// # Safety
    /// No thread may be executing the first bytes of the original while they
    /// are being rewritten.
    pub unsafe fn enable(&mut self) -> Result<()> {
        if self.enabled {
            return Ok(());
        }

        let patch = self.patch;
        unsafe { self.patch_original(&patch)? };
        self.enabled = true;

        debug!("Enabled hook at {:#x}", self.original);
        Ok(())
    }

    /// Restores the stolen bytes.
    ///
    /// # Safety
    /// See [`enable`](Self::enable).
    pub unsafe fn disable(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let bytes = match &self.stolen {
            StolenBytes::Relocated { trampoline } => {
                let mut bytes = vec![0u8; self.stolen_length];
                unsafe { self.memory.read(*trampoline, &mut bytes)? };
                bytes
            }
            StolenBytes::Saved(bytes) => bytes.clone(),
        };
        unsafe { self.patch_original(&bytes)? };
        self.enabled = false;

        debug!("Disabled hook at {:#x}", self.original);
        Ok(())
    }

    /// Disables and drops the hook, reporting a failure to restore the
    /// original instead of logging it.
    ///
    /// If the original cannot be restored its region is leaked, since the
    /// patch left behind still jumps into it.
    ///
    /// # Safety
    /// See [`enable`](Self::enable).
    pub unsafe fn remove(mut self) -> Result<()> {
        unsafe { self.disable() }
    }

    unsafe fn patch_original(&self, bytes: &[u8]) -> Result<()> {
        if !self.memory.requires_protection() {
            unsafe { self.memory.write(self.original, bytes)? };
            return Ok(());
        }

        let granularity = self.memory.page_granularity();
        let start = align_down(self.original, granularity);
        let end = align_up(self.original + bytes.len(), granularity);

        let guard = unsafe {
            ProtectionGuard::guard(
                self.memory,
                start,
                end - start,
                MemoryProtection::ReadWriteExecute,
                MemoryProtection::ReadExecute,
            )?
        };
        unsafe { self.memory.write(self.original, bytes)? };
        guard.restore()?;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Address that behaves like the unhooked original. Only present when
    /// the hook was built with a trampoline.
    pub fn trampoline(&self) -> Option<usize> {
        match self.stolen {
            StolenBytes::Relocated { trampoline } => Some(trampoline),
            StolenBytes::Saved(_) => None,
        }
    }

    pub fn original(&self) -> usize {
        self.original
    }

    pub fn detour(&self) -> usize {
        self.detour
    }

    pub fn stolen_length(&self) -> usize {
        self.stolen_length
    }

    /// Whether the patch jumps to a stub in the region instead of the detour.
    pub fn uses_indirection(&self) -> bool {
        self.indirection.is_some()
    }

    /// The bytes [`enable`](Self::enable) writes.
    pub fn patch(&self) -> &[u8; REL_JMP_LENGTH] {
        &self.patch
    }

    pub fn region(&self) -> Option<&A::Region> {
        self.region.as_ref()
    }
}

impl<M: MemoryAccessor, A: RegionAllocator> fmt::Debug for Hook<'_, M, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("original", &format_args!("{:#x}", self.original))
            .field("detour", &format_args!("{:#x}", self.detour))
            .field("stolen_length", &self.stolen_length)
            .field("trampoline", &self.trampoline().map(|t| format!("{t:#x}")))
            .field("indirection", &self.indirection.map(|i| format!("{i:#x}")))
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<M: MemoryAccessor, A: RegionAllocator> Drop for Hook<'_, M, A> {
    fn drop(&mut self) {
        if let Err(error) = unsafe { self.disable() } {
            error!(
                "Failed to restore {:#x} while dropping its hook, leaking its region: {error}",
                self.original
            );
            // The original still jumps into the region
            if let Some(region) = self.region.take() {
                std::mem::forget(region);
            }
        }
    }
}
