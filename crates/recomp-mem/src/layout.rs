//! Fixed simulated memory map of the recompiled image.
//!
//! Every address below is a simulated (console) virtual address. Translated code embeds these
//! values as immediates, so they are build-time constants rather than something parsed out of the
//! image headers at runtime.

/// Lowest mapped simulated address. Low memory is mapped because the game reads the per-thread
/// block at `0x00..0x30` through a dropped segment prefix.
pub const MAP_START: u32 = 0x0000_0000;

/// Base address the image was linked against.
pub const IMAGE_BASE: u32 = 0x0001_0000;

pub const RDATA_VA: u32 = 0x0036_B7C0;
pub const RDATA_SIZE: u32 = 289_684;
pub const RDATA_FILE_OFFSET: u32 = 0x0035_C000;

pub const DATA_VA: u32 = 0x003B_2360;
/// Virtual size of `.data` including BSS.
pub const DATA_SIZE: u32 = 3_904_988;
/// Bytes of `.data` present in the file. Everything past this is BSS.
pub const DATA_INIT_SIZE: u32 = 424_960;
pub const DATA_FILE_OFFSET: u32 = 0x003A_3000;

/// 4 KiB scratch area holding the kernel data exports and the synthetic thread block.
pub const KERNEL_DATA_VA: u32 = 0x0077_5000;
pub const KERNEL_DATA_SIZE: u32 = 0x1000;

/// Offset of the synthetic thread block inside the kernel data area.
pub const THREAD_BLOCK_OFFSET: u32 = 0x0E00;
/// Size of the thread-local storage area hung off the thread block.
pub const TLS_AREA_SIZE: u32 = 16 * 1024;

pub const STACK_BASE: u32 = 0x0078_0000;
pub const STACK_SIZE: u32 = 1024 * 1024;
/// Initial stack pointer. Leaves a small red zone below the end of the stack region.
pub const STACK_TOP: u32 = STACK_BASE + STACK_SIZE - 16;

pub const HEAP_BASE: u32 = 0x0088_0000;
pub const HEAP_SIZE: u32 = 96 * 1024 * 1024;

/// One past the highest mapped simulated address.
pub const MAP_END: u32 = HEAP_BASE + HEAP_SIZE;

/// Kernel import (thunk) table. It occupies the first bytes of `.rdata`.
pub const IMPORT_TABLE_VA: u32 = RDATA_VA;
pub const IMPORT_SLOT_COUNT: usize = 147;

/// Low-memory fields of the synthetic per-thread block.
pub mod tib {
    /// Exception-chain head. `0xFFFF_FFFF` terminates the chain.
    pub const EXCEPTION_LIST: u32 = 0x00;
    /// High end of the stack.
    pub const STACK_BASE: u32 = 0x04;
    /// Low end of the stack.
    pub const STACK_LIMIT: u32 = 0x08;
    pub const SELF: u32 = 0x18;
    /// Processor-control pointer. Left null so optional fast-path init bails out.
    pub const PRCB: u32 = 0x20;
    /// Pointer to the thread block in the kernel data area.
    pub const THREAD: u32 = 0x28;

    /// Offset of the TLS pointer inside the thread block.
    pub const THREAD_TLS: u32 = 0x28;

    pub const EXCEPTION_LIST_END: u32 = 0xFFFF_FFFF;
}

/// An image section copied into the address space at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub name: &'static str,
    pub va: u32,
    /// Bytes copied from the image.
    pub raw_size: u32,
    pub file_offset: u32,
    /// Copied read-only.
    pub read_only: bool,
    /// Missing optional sections are skipped; missing required ones fail init.
    pub required: bool,
}

impl Section {
    pub fn file_range(&self) -> core::ops::Range<usize> {
        let start = self.file_offset as usize;
        start..start + self.raw_size as usize
    }

    pub fn va_end(&self) -> u32 {
        self.va + self.raw_size
    }
}

pub const SECTIONS: &[Section] = &[
    Section {
        name: ".rdata",
        va: RDATA_VA,
        raw_size: RDATA_SIZE,
        file_offset: RDATA_FILE_OFFSET,
        read_only: true,
        required: true,
    },
    Section {
        name: ".data",
        va: DATA_VA,
        raw_size: DATA_INIT_SIZE,
        file_offset: DATA_FILE_OFFSET,
        read_only: false,
        required: true,
    },
    Section {
        name: "DOLBY",
        va: 0x0076_B940,
        raw_size: 29_056,
        file_offset: 0x0040_C000,
        read_only: false,
        required: false,
    },
    Section {
        name: "XON_RD",
        va: 0x0077_2AC0,
        raw_size: 5_416,
        file_offset: 0x0041_4000,
        read_only: false,
        required: false,
    },
    Section {
        name: ".data1",
        va: 0x0077_4000,
        raw_size: 224,
        file_offset: 0x0041_6000,
        read_only: false,
        required: false,
    },
];

/// A host base address to try when reserving the simulated address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasePreference {
    /// Accept only a reservation placed exactly here.
    Exact(u64),
    /// Let the host pick. Always accepted.
    HostChooses,
}

/// Default candidate list: the original base first, then successively higher round addresses,
/// then no preference at all.
pub fn default_candidates() -> Vec<BasePreference> {
    let mut out = vec![
        BasePreference::Exact(0),
        BasePreference::Exact(0x1000_0000),
        BasePreference::Exact(0x2000_0000),
        BasePreference::Exact(0x4000_0000),
        BasePreference::Exact(0x8000_0000),
    ];
    if usize::BITS > 32 {
        out.push(BasePreference::Exact(0x1_0000_0000));
        out.push(BasePreference::Exact(0x10_0000_0000));
    }
    out.push(BasePreference::HostChooses);
    out
}

/// The regions the address space manager is built from.
///
/// [`MemoryLayout::default`] is the fixed map above; tests may shrink the heap or swap sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    pub map_start: u32,
    pub sections: Vec<Section>,
    pub kernel_data: u32,
    pub stack_base: u32,
    pub stack_size: u32,
    pub heap_base: u32,
    pub heap_size: u32,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            map_start: MAP_START,
            sections: SECTIONS.to_vec(),
            kernel_data: KERNEL_DATA_VA,
            stack_base: STACK_BASE,
            stack_size: STACK_SIZE,
            heap_base: HEAP_BASE,
            heap_size: HEAP_SIZE,
        }
    }
}

impl MemoryLayout {
    pub fn map_end(&self) -> u32 {
        let stack_end = self.stack_base + self.stack_size;
        let heap_end = self.heap_base + self.heap_size;
        stack_end.max(heap_end)
    }

    pub fn span(&self) -> usize {
        (self.map_end() - self.map_start) as usize
    }

    pub fn stack_top(&self) -> u32 {
        self.stack_base + self.stack_size - 16
    }

    pub fn stack_end(&self) -> u32 {
        self.stack_base + self.stack_size
    }

    pub fn heap_end(&self) -> u32 {
        self.heap_base + self.heap_size
    }

    pub fn thread_block(&self) -> u32 {
        self.kernel_data + THREAD_BLOCK_OFFSET
    }
}
