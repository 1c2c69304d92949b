//! Boundary between the bridge and the kernel services it calls.
//!
//! Bridges decode arguments off the simulated stack, dereference pointer arguments and write
//! results back; a [`KernelServices`] implementation only sees plain values and simulated
//! addresses. [`HostKernel`] is the in-tree implementation used for bring-up and tests.

mod data;
mod host;

use bitflags::bitflags;
use recomp_mem::AddressSpace;

pub use data::{KernelData, KernelDataField};
pub use host::{DisplayMode, HostKernel, PERFORMANCE_FREQUENCY};

/// NT status code as returned in `eax`.
pub type NtStatus = u32;

pub mod status {
    use super::NtStatus;

    pub const STATUS_SUCCESS: NtStatus = 0x0000_0000;
    pub const STATUS_TIMEOUT: NtStatus = 0x0000_0102;
    pub const STATUS_UNSUCCESSFUL: NtStatus = 0xC000_0001;
    pub const STATUS_NOT_IMPLEMENTED: NtStatus = 0xC000_0002;
    pub const STATUS_INVALID_HANDLE: NtStatus = 0xC000_0008;
    pub const STATUS_INVALID_PARAMETER: NtStatus = 0xC000_000D;
    pub const STATUS_NO_MEMORY: NtStatus = 0xC000_0017;
    pub const STATUS_INSUFFICIENT_RESOURCES: NtStatus = 0xC000_009A;

    pub fn is_success(status: NtStatus) -> bool {
        (status as i32) >= 0
    }
}

bitflags! {
    /// `AllocationType` / `FreeType` bits of the NT virtual memory calls.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct AllocationType: u32 {
        const COMMIT = 0x0000_1000;
        const RESERVE = 0x0000_2000;
        const DECOMMIT = 0x0000_4000;
        const RELEASE = 0x0000_8000;
        const RESET = 0x0008_0000;
        const TOP_DOWN = 0x0010_0000;
        const NOZERO = 0x0080_0000;
    }
}

/// Kernel services reachable from bridged imports.
///
/// Methods that need to look through a pointer receive the address space alongside the
/// simulated address. Anything handing out memory must allocate with
/// [`AddressSpace::alloc_from_heap`] so translated code can dereference the result.
pub trait KernelServices {
    /// The concrete service, for inspection with [`crate::Machine::kernel_as`].
    fn as_any(&self) -> &dyn core::any::Any;

    fn av_set_display_mode(&mut self, mode: DisplayMode);

    /// Pool allocation. `tag` is zero for untagged allocations.
    fn ex_allocate_pool(&mut self, mem: &mut AddressSpace, size: u32, tag: u32) -> u32;
    fn ex_query_pool_block_size(&mut self, block: u32) -> u32;

    fn query_performance_counter(&mut self) -> u64;
    fn query_performance_frequency(&self) -> u64;
    /// Current time in 100 ns units since 1601-01-01.
    fn query_system_time(&mut self) -> u64;
    /// `interval` is negative for relative delays, in 100 ns units.
    fn delay_execution(&mut self, alertable: bool, interval: i64) -> NtStatus;

    fn raise_irql(&mut self, new_irql: u8) -> u8;
    fn lower_irql(&mut self, new_irql: u8);
    fn raise_irql_to_dpc_level(&mut self) -> u8 {
        self.raise_irql(2)
    }

    /// Signals the dispatcher object at `event`, returning its previous signal state.
    fn ke_set_event(&mut self, mem: &mut AddressSpace, event: u32, increment: u32, wait: bool)
        -> u32;
    /// `timeout` is `None` for an infinite wait.
    fn ke_wait_for_single_object(
        &mut self,
        mem: &mut AddressSpace,
        object: u32,
        alertable: bool,
        timeout: Option<i64>,
    ) -> NtStatus;
    fn nt_create_event(&mut self, event_type: u32, initial_state: bool) -> Result<u32, NtStatus>;
    /// Returns the previous signal state.
    fn nt_set_event(&mut self, handle: u32) -> Result<u32, NtStatus>;
    fn nt_wait_for_single_object(
        &mut self,
        handle: u32,
        alertable: bool,
        timeout: Option<i64>,
    ) -> NtStatus;
    fn nt_close(&mut self, handle: u32) -> NtStatus;
    fn nt_yield_execution(&mut self) -> NtStatus;
    fn obf_dereference_object(&mut self, object: u32);

    fn rtl_initialize_critical_section(&mut self, mem: &mut AddressSpace, cs: u32);
    fn rtl_enter_critical_section(&mut self, mem: &mut AddressSpace, cs: u32);
    fn rtl_leave_critical_section(&mut self, mem: &mut AddressSpace, cs: u32);

    fn mm_allocate_contiguous(&mut self, mem: &mut AddressSpace, size: u32, align: u32) -> u32;
    fn mm_free_contiguous(&mut self, mem: &mut AddressSpace, addr: u32);
    fn mm_persist_contiguous(&mut self, addr: u32, size: u32, persist: bool);
    fn mm_set_address_protect(&mut self, addr: u32, size: u32, protect: u32);
    fn mm_query_statistics(&mut self, mem: &mut AddressSpace, stats: u32) -> NtStatus;
    fn nt_free_virtual_memory(&mut self, mem: &mut AddressSpace, base: u32, size: u32)
        -> NtStatus;

    /// The simulated system thread asked to exit with `status`.
    fn thread_terminated(&mut self, status: u32);

    fn hal_is_reset_or_shutdown_pending(&mut self) -> bool;
}
