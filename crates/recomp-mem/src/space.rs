use core::ptr::NonNull;

use tracing::{debug, info, warn};

use crate::access::GuestMemory;
use crate::error::{AddressSpaceError, Result};
use crate::heap::BumpHeap;
use crate::host::{default_reserver, HostReserver, Protection, Reservation};
use crate::layout::{
    default_candidates, tib, BasePreference, MemoryLayout, Section, TLS_AREA_SIZE,
};

/// Inputs to [`AddressSpace::init_with`].
#[derive(Debug, Clone)]
pub struct SpaceConfig {
    pub layout: MemoryLayout,
    /// Tried in order; the first accepted reservation wins.
    pub candidates: Vec<BasePreference>,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            layout: MemoryLayout::default(),
            candidates: default_candidates(),
        }
    }
}

/// The simulated 32-bit address space, backed by one contiguous host region.
///
/// Simulated address `a` lives at host address `a + offset()`. The offset is fixed by
/// [`AddressSpace::init`] and never changes afterwards.
pub struct AddressSpace {
    region: Option<Reservation>,
    ptr: NonNull<u8>,
    len: usize,
    offset: i64,
    layout: MemoryLayout,
    heap: BumpHeap,
    read_only: Vec<(u32, u32)>,
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &self.len)
            .field("offset", &self.offset)
            .field("heap_used", &self.heap.used())
            .finish()
    }
}

impl AddressSpace {
    /// Reserves the fixed memory map and loads `image` into it using the platform's default
    /// host backend.
    pub fn init(image: &[u8]) -> Result<Self> {
        let mut reserver = default_reserver();
        Self::init_with(image, reserver.as_mut(), &SpaceConfig::default())
    }

    pub fn init_with(
        image: &[u8],
        reserver: &mut dyn HostReserver,
        config: &SpaceConfig,
    ) -> Result<Self> {
        let layout = config.layout.clone();

        // Validate before reserving so a failure leaves nothing behind.
        for s in layout.sections.iter().filter(|s| s.required) {
            if s.file_range().end > image.len() {
                return Err(AddressSpaceError::SectionOutOfBounds {
                    name: s.name,
                    file_offset: s.file_offset,
                    size: s.raw_size,
                    image_len: image.len(),
                });
            }
        }

        let span = layout.span();
        let region = reserve_region(reserver, &config.candidates, span)?;
        let base = region.base();
        let offset = base as i64 - i64::from(layout.map_start);

        info!(
            backend = reserver.name(),
            base = format_args!("{base:#x}"),
            offset,
            span = format_args!("{span:#x}"),
            "address space reserved"
        );
        if offset != 0 {
            warn!(offset, "address space is not at its original base; running translated");
        }

        let heap = BumpHeap::new(layout.heap_base, layout.heap_size);
        let mut space = Self {
            ptr: region.as_ptr(),
            len: region.len(),
            region: Some(region),
            offset,
            layout,
            heap,
            read_only: Vec::new(),
        };

        let loaded = space.load_sections(image);
        space.seed_low_memory();
        space.protect_constants(&loaded)?;

        Ok(space)
    }

    /// Copies every section the image carries and returns the ones that were copied.
    fn load_sections(&mut self, image: &[u8]) -> Vec<Section> {
        let sections = self.layout.sections.clone();
        let mut loaded = Vec::with_capacity(sections.len());
        for s in sections {
            let range = s.file_range();
            if range.end > image.len() {
                debug!(section = s.name, "optional section not present in image; skipped");
                continue;
            }
            self.write_from(s.va, &image[range]);
            debug!(
                section = s.name,
                va = format_args!("{:#010x}", s.va),
                bytes = s.raw_size,
                "section loaded"
            );
            loaded.push(s);
        }
        loaded
    }

    /// Writes the per-thread fields the game reads unconditionally through a dropped segment
    /// prefix, plus the thread block and its TLS area.
    fn seed_low_memory(&mut self) {
        let stack_end = self.layout.stack_end();
        let stack_base = self.layout.stack_base;
        let thread_block = self.layout.thread_block();

        self.write_u32(tib::EXCEPTION_LIST, tib::EXCEPTION_LIST_END);
        self.write_u32(tib::STACK_BASE, stack_end);
        self.write_u32(tib::STACK_LIMIT, stack_base);
        self.write_u32(tib::SELF, 0);
        self.write_u32(tib::PRCB, 0);

        let tls = self.heap.alloc(TLS_AREA_SIZE, 16);
        self.write_u32(thread_block + tib::THREAD_TLS, tls);
        self.write_u32(tib::THREAD, thread_block);

        debug!(
            thread_block = format_args!("{thread_block:#010x}"),
            tls = format_args!("{tls:#010x}"),
            "low memory seeded"
        );
    }

    fn protect_constants(&mut self, loaded: &[Section]) -> Result<()> {
        for s in loaded.iter().filter(|s| s.read_only) {
            self.set_protection(s.va, s.raw_size, Protection::ReadOnly)?;
            self.read_only.push((s.va, s.raw_size));
        }
        Ok(())
    }

    fn set_protection(&mut self, addr: u32, len: u32, prot: Protection) -> Result<()> {
        let offset = self.index(addr);
        let region = self.region.as_mut().ok_or(AddressSpaceError::ShutDown)?;
        region
            .protect(offset, len as usize, prot)
            .map_err(|source| AddressSpaceError::Protection { addr, len, source })
    }

    /// Runs `f` with `[addr, addr + len)` temporarily writable, then re-applies every read-only
    /// range the space was initialized with.
    pub fn with_writable<R>(
        &mut self,
        addr: u32,
        len: u32,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R> {
        self.set_protection(addr, len, Protection::ReadWrite)?;
        let out = f(self);
        for (va, size) in self.read_only.clone() {
            self.set_protection(va, size, Protection::ReadOnly)?;
        }
        Ok(out)
    }

    /// Releases the host region. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(region) = self.region.take() {
            info!(
                base = format_args!("{:#x}", region.base()),
                heap_used = self.heap.used(),
                "address space released"
            );
            drop(region);
        }
        self.ptr = NonNull::dangling();
        self.len = 0;
        self.read_only.clear();
    }

    pub fn is_active(&self) -> bool {
        self.region.is_some()
    }

    /// Host pointer for simulated address `addr`.
    ///
    /// `addr` is not range-checked; the result is only meaningful for addresses inside the map.
    #[inline]
    pub fn translate(&self, addr: u32) -> *mut u8 {
        self.ptr
            .as_ptr()
            .wrapping_add(addr.wrapping_sub(self.layout.map_start) as usize)
    }

    /// Host base minus the simulated base. Zero when the original base was obtained.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn base(&self) -> u64 {
        self.ptr.as_ptr() as usize as u64
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn is_guest_address(&self, addr: u32) -> bool {
        let start = self.layout.map_start;
        addr >= start && u64::from(addr - start) < self.len as u64
    }

    /// Bump-allocates from the heap region. Returns `0` on exhaustion.
    pub fn alloc_from_heap(&mut self, size: u32, align: u32) -> u32 {
        let addr = self.heap.alloc(size, align);
        if addr == 0 {
            warn!(
                size,
                align,
                remaining = self.heap.remaining(),
                "simulated heap exhausted"
            );
        }
        addr
    }

    /// Heap blocks are never reclaimed.
    pub fn free_from_heap(&mut self, addr: u32) {
        self.heap.free(addr);
    }

    pub fn heap_used(&self) -> u32 {
        self.heap.used()
    }

    pub fn heap_remaining(&self) -> u32 {
        self.heap.remaining()
    }

    pub fn heap_contains(&self, addr: u32) -> bool {
        self.heap.contains(addr)
    }

    #[inline]
    fn index(&self, addr: u32) -> usize {
        addr.wrapping_sub(self.layout.map_start) as usize
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        // SAFETY: `ptr..ptr+len` is the live reservation owned by `self.region` (or an empty
        // dangling slice after shutdown).
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and `&mut self` guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

fn reserve_region(
    reserver: &mut dyn HostReserver,
    candidates: &[BasePreference],
    span: usize,
) -> Result<Reservation> {
    for (i, pref) in candidates.iter().enumerate() {
        let hint = match *pref {
            BasePreference::Exact(base) => Some(base),
            BasePreference::HostChooses => None,
        };
        let Some(region) = reserver.reserve(hint, span) else {
            debug!(attempt = i, ?pref, "reservation refused");
            continue;
        };
        match hint {
            Some(want) if region.base() != want => {
                debug!(
                    attempt = i,
                    want = format_args!("{want:#x}"),
                    got = format_args!("{:#x}", region.base()),
                    "reservation placed elsewhere; released"
                );
            }
            _ => return Ok(region),
        }
    }
    Err(AddressSpaceError::NoBaseReservable {
        len: span,
        tried: candidates.len(),
    })
}

impl GuestMemory for AddressSpace {
    #[inline]
    fn read_into(&self, addr: u32, dst: &mut [u8]) {
        let start = self.index(addr);
        dst.copy_from_slice(&self.bytes()[start..start + dst.len()]);
    }

    #[inline]
    fn write_from(&mut self, addr: u32, src: &[u8]) {
        let start = self.index(addr);
        #[cfg(debug_assertions)]
        if let Some(region) = &self.region {
            assert!(
                !region.is_read_only(start, src.len()),
                "write to read-only simulated memory at {addr:#010x} ({} bytes)",
                src.len()
            );
        }
        self.bytes_mut()[start..start + src.len()].copy_from_slice(src);
    }
}
