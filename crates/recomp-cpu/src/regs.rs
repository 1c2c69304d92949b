use recomp_mem::GuestMemory;

/// The register slots shared by every translated function.
///
/// Callee-saved registers (`ebx`, `esi`, `edi`, `ebp`) are locals inside translated functions and
/// are preserved the way the original code preserves them, so only the slots that cross call
/// boundaries live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    /// Accumulator and primary return value.
    pub eax: u32,
    /// Scratch; first fastcall argument.
    pub ecx: u32,
    /// Scratch; second fastcall argument and high half of 64-bit results.
    pub edx: u32,
    pub esp: u32,
}

impl Registers {
    pub fn with_stack(top: u32) -> Self {
        Self {
            esp: top,
            ..Self::default()
        }
    }

    /// `push v`: decrement `esp` by 4, then store.
    #[inline]
    pub fn push32<M: GuestMemory + ?Sized>(&mut self, mem: &mut M, v: u32) {
        self.esp = self.esp.wrapping_sub(4);
        mem.write_u32(self.esp, v);
    }

    /// `pop`: load, then increment `esp` by 4.
    #[inline]
    pub fn pop32<M: GuestMemory + ?Sized>(&mut self, mem: &M) -> u32 {
        let v = mem.read_u32(self.esp);
        self.esp = self.esp.wrapping_add(4);
        v
    }

    /// The `n`th dword above the stack pointer, without popping.
    #[inline]
    pub fn stack_arg<M: GuestMemory + ?Sized>(&self, mem: &M, n: u32) -> u32 {
        mem.read_u32(self.esp.wrapping_add(4 * n))
    }

    /// `edx:eax` as one 64-bit value.
    pub fn result64(&self) -> u64 {
        (u64::from(self.edx) << 32) | u64::from(self.eax)
    }

    pub fn set_result64(&mut self, v: u64) {
        self.eax = v as u32;
        self.edx = (v >> 32) as u32;
    }
}
