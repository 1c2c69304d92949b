/// Minimum alignment of every heap allocation.
pub const MIN_ALIGN: u32 = 4;

/// Forward-only allocator over `[base, end)`.
///
/// Addresses are never handed out twice and freeing does nothing.
#[derive(Debug, Clone)]
pub struct BumpHeap {
    base: u32,
    end: u32,
    cursor: u32,
}

impl BumpHeap {
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            end: base.saturating_add(size),
            cursor: base,
        }
    }

    /// Returns the address of a fresh block, or `0` when the region cannot fit it.
    ///
    /// `align` is raised to at least [`MIN_ALIGN`] and to the next power of two. Zero-sized
    /// requests still consume one byte so consecutive results stay distinct.
    pub fn alloc(&mut self, size: u32, align: u32) -> u32 {
        let align = align.max(MIN_ALIGN).checked_next_power_of_two();
        let Some(align) = align else {
            return 0;
        };
        let size = size.max(1);

        let Some(start) = self
            .cursor
            .checked_add(align - 1)
            .map(|v| v & !(align - 1))
        else {
            return 0;
        };
        match start.checked_add(size) {
            Some(next) if next <= self.end => {
                self.cursor = next;
                start
            }
            _ => 0,
        }
    }

    /// No-op. Kept so allocation services have a symmetric call.
    pub fn free(&mut self, _addr: u32) {}

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn used(&self) -> u32 {
        self.cursor - self.base
    }

    pub fn remaining(&self) -> u32 {
        self.end - self.cursor
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end
    }
}
