use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use recomp_mem::{AddressSpace, GuestMemory};
use tracing::{debug, info, trace, warn};

use super::status::*;
use super::{KernelServices, NtStatus};

/// Rate reported by `KeQueryPerformanceFrequency`: the console's ACPI timer.
pub const PERFORMANCE_FREQUENCY: u64 = 3_375_000;

/// 100 ns intervals between 1601-01-01 and 1970-01-01.
const EPOCH_DIFFERENCE_100NS: u64 = 116_444_736_000_000_000;

const PASSIVE_LEVEL: u8 = 0;
const PAGE_SIZE: u32 = 0x1000;
const FIRST_HANDLE: u32 = 0x0000_1000;
/// Owner recorded in critical sections. Only one simulated thread ever runs.
const CURRENT_THREAD: u32 = 1;

/// Dispatcher header field offsets.
const HEADER_SIGNAL_STATE: u32 = 0x04;

/// `RTL_CRITICAL_SECTION` field offsets (after the embedded event).
const CS_LOCK_COUNT: u32 = 0x10;
const CS_RECURSION_COUNT: u32 = 0x14;
const CS_OWNING_THREAD: u32 = 0x18;

/// `MM_STATISTICS` is nine dwords, the first being its own length.
const MM_STATISTICS_LEN: u32 = 36;
const TOTAL_PHYSICAL_PAGES: u32 = 64 * 1024 * 1024 / PAGE_SIZE;

/// Arguments of the last `AvSetDisplayMode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayMode {
    pub register_base: u32,
    pub step: u32,
    pub mode: u32,
    pub format: u32,
    pub pitch: u32,
    pub frame_buffer: u32,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    manual_reset: bool,
    signaled: bool,
}

/// Host-backed kernel services for a single simulated thread.
///
/// Waits succeed immediately, sleeps block the host thread, and memory comes from the simulated
/// heap.
#[derive(Debug)]
pub struct HostKernel {
    started: Instant,
    irql: u8,
    next_handle: u32,
    events: HashMap<u32, Event>,
    pool_blocks: HashMap<u32, u32>,
    display_mode: Option<DisplayMode>,
    exit_statuses: Vec<u32>,
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl HostKernel {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            irql: PASSIVE_LEVEL,
            next_handle: FIRST_HANDLE,
            events: HashMap::new(),
            pool_blocks: HashMap::new(),
            display_mode: None,
            exit_statuses: Vec::new(),
        }
    }

    pub fn irql(&self) -> u8 {
        self.irql
    }

    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.display_mode
    }

    /// Exit statuses passed to `PsTerminateSystemThread`, oldest first.
    pub fn exit_statuses(&self) -> &[u32] {
        &self.exit_statuses
    }

    pub fn open_events(&self) -> usize {
        self.events.len()
    }

    fn alloc_handle(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(4);
        h
    }
}

impl KernelServices for HostKernel {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn av_set_display_mode(&mut self, mode: DisplayMode) {
        info!(
            mode = format_args!("{:#x}", mode.mode),
            format = format_args!("{:#x}", mode.format),
            pitch = mode.pitch,
            frame_buffer = format_args!("{:#010x}", mode.frame_buffer),
            "display mode set"
        );
        self.display_mode = Some(mode);
    }

    fn ex_allocate_pool(&mut self, mem: &mut AddressSpace, size: u32, tag: u32) -> u32 {
        let addr = mem.alloc_from_heap(size, 16);
        if addr != 0 {
            self.pool_blocks.insert(addr, size);
        }
        trace!(
            size,
            tag = format_args!("{tag:#010x}"),
            addr = format_args!("{addr:#010x}"),
            "pool alloc"
        );
        addr
    }

    fn ex_query_pool_block_size(&mut self, block: u32) -> u32 {
        self.pool_blocks.get(&block).copied().unwrap_or(0)
    }

    fn query_performance_counter(&mut self) -> u64 {
        let nanos = self.started.elapsed().as_nanos();
        (nanos * u128::from(PERFORMANCE_FREQUENCY) / 1_000_000_000) as u64
    }

    fn query_performance_frequency(&self) -> u64 {
        PERFORMANCE_FREQUENCY
    }

    fn query_system_time(&mut self) -> u64 {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        EPOCH_DIFFERENCE_100NS + (since_unix.as_nanos() / 100) as u64
    }

    fn delay_execution(&mut self, _alertable: bool, interval: i64) -> NtStatus {
        let ticks = if interval < 0 {
            interval.unsigned_abs()
        } else {
            (interval as u64).saturating_sub(self.query_system_time())
        };
        if ticks > 0 {
            std::thread::sleep(Duration::from_nanos(ticks.saturating_mul(100)));
        }
        STATUS_SUCCESS
    }

    fn raise_irql(&mut self, new_irql: u8) -> u8 {
        let old = self.irql;
        if new_irql < old {
            warn!(old, new_irql, "KfRaiseIrql to a lower level");
        }
        self.irql = new_irql;
        old
    }

    fn lower_irql(&mut self, new_irql: u8) {
        if new_irql > self.irql {
            warn!(current = self.irql, new_irql, "KfLowerIrql to a higher level");
        }
        self.irql = new_irql;
    }

    fn ke_set_event(
        &mut self,
        mem: &mut AddressSpace,
        event: u32,
        _increment: u32,
        _wait: bool,
    ) -> u32 {
        if event == 0 {
            return 0;
        }
        let prev = mem.read_u32(event + HEADER_SIGNAL_STATE);
        mem.write_u32(event + HEADER_SIGNAL_STATE, 1);
        prev
    }

    fn ke_wait_for_single_object(
        &mut self,
        _mem: &mut AddressSpace,
        object: u32,
        _alertable: bool,
        timeout: Option<i64>,
    ) -> NtStatus {
        trace!(object = format_args!("{object:#010x}"), ?timeout, "wait satisfied immediately");
        STATUS_SUCCESS
    }

    fn nt_create_event(&mut self, event_type: u32, initial_state: bool) -> Result<u32, NtStatus> {
        let handle = self.alloc_handle();
        self.events.insert(
            handle,
            Event {
                // NotificationEvent = 0, SynchronizationEvent = 1.
                manual_reset: event_type == 0,
                signaled: initial_state,
            },
        );
        debug!(handle = format_args!("{handle:#x}"), event_type, initial_state, "event created");
        Ok(handle)
    }

    fn nt_set_event(&mut self, handle: u32) -> Result<u32, NtStatus> {
        let ev = self.events.get_mut(&handle).ok_or(STATUS_INVALID_HANDLE)?;
        let prev = u32::from(ev.signaled);
        ev.signaled = true;
        Ok(prev)
    }

    fn nt_wait_for_single_object(
        &mut self,
        handle: u32,
        _alertable: bool,
        _timeout: Option<i64>,
    ) -> NtStatus {
        if let Some(ev) = self.events.get_mut(&handle) {
            if !ev.manual_reset {
                ev.signaled = false;
            }
        }
        STATUS_SUCCESS
    }

    fn nt_close(&mut self, handle: u32) -> NtStatus {
        // Unknown handles (threads, files opened elsewhere) close successfully too.
        self.events.remove(&handle);
        STATUS_SUCCESS
    }

    fn nt_yield_execution(&mut self) -> NtStatus {
        std::thread::yield_now();
        STATUS_SUCCESS
    }

    fn obf_dereference_object(&mut self, _object: u32) {}

    fn rtl_initialize_critical_section(&mut self, mem: &mut AddressSpace, cs: u32) {
        if cs == 0 {
            return;
        }
        mem.fill(cs, CS_OWNING_THREAD as usize + 4, 0);
        mem.write_i32(cs + CS_LOCK_COUNT, -1);
    }

    fn rtl_enter_critical_section(&mut self, mem: &mut AddressSpace, cs: u32) {
        if cs == 0 {
            return;
        }
        let lock = mem.read_i32(cs + CS_LOCK_COUNT);
        mem.write_i32(cs + CS_LOCK_COUNT, lock.wrapping_add(1));
        if mem.read_u32(cs + CS_OWNING_THREAD) == CURRENT_THREAD {
            let n = mem.read_u32(cs + CS_RECURSION_COUNT);
            mem.write_u32(cs + CS_RECURSION_COUNT, n + 1);
        } else {
            mem.write_u32(cs + CS_OWNING_THREAD, CURRENT_THREAD);
            mem.write_u32(cs + CS_RECURSION_COUNT, 1);
        }
    }

    fn rtl_leave_critical_section(&mut self, mem: &mut AddressSpace, cs: u32) {
        if cs == 0 {
            return;
        }
        let n = mem.read_u32(cs + CS_RECURSION_COUNT);
        if n == 0 {
            warn!(cs = format_args!("{cs:#010x}"), "leaving a critical section that is not held");
            return;
        }
        mem.write_u32(cs + CS_RECURSION_COUNT, n - 1);
        if n == 1 {
            mem.write_u32(cs + CS_OWNING_THREAD, 0);
        }
        let lock = mem.read_i32(cs + CS_LOCK_COUNT);
        mem.write_i32(cs + CS_LOCK_COUNT, lock.wrapping_sub(1));
    }

    fn mm_allocate_contiguous(&mut self, mem: &mut AddressSpace, size: u32, align: u32) -> u32 {
        let align = if align.is_power_of_two() {
            align.max(PAGE_SIZE)
        } else {
            PAGE_SIZE
        };
        mem.alloc_from_heap(size, align)
    }

    fn mm_free_contiguous(&mut self, mem: &mut AddressSpace, addr: u32) {
        mem.free_from_heap(addr);
    }

    fn mm_persist_contiguous(&mut self, addr: u32, size: u32, persist: bool) {
        trace!(addr = format_args!("{addr:#010x}"), size, persist, "persist hint ignored");
    }

    fn mm_set_address_protect(&mut self, addr: u32, size: u32, protect: u32) {
        trace!(
            addr = format_args!("{addr:#010x}"),
            size,
            protect = format_args!("{protect:#x}"),
            "protection change ignored"
        );
    }

    fn mm_query_statistics(&mut self, mem: &mut AddressSpace, stats: u32) -> NtStatus {
        if stats == 0 || mem.read_u32(stats) != MM_STATISTICS_LEN {
            return STATUS_INVALID_PARAMETER;
        }
        let committed = mem.heap_used();
        let values = [
            TOTAL_PHYSICAL_PAGES,
            mem.heap_remaining() / PAGE_SIZE,
            committed,
            committed,
            0,
            committed / PAGE_SIZE,
            0,
            0,
        ];
        for (i, v) in values.iter().enumerate() {
            mem.write_u32(stats + 4 + 4 * i as u32, *v);
        }
        STATUS_SUCCESS
    }

    fn nt_free_virtual_memory(
        &mut self,
        mem: &mut AddressSpace,
        base: u32,
        _size: u32,
    ) -> NtStatus {
        mem.free_from_heap(base);
        STATUS_SUCCESS
    }

    fn thread_terminated(&mut self, status: u32) {
        self.exit_statuses.push(status);
    }

    fn hal_is_reset_or_shutdown_pending(&mut self) -> bool {
        false
    }
}
