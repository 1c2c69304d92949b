//! Per-export marshalling: stack arguments in, kernel service call, `eax`/`edx` out.
//!
//! Every routine runs with the placeholder return address already popped, so `m.arg(n)` is the
//! `n`th argument as pushed by the translated caller. Stack cleanup is done by the dispatcher
//! from the export's calling convention, never here.

use recomp_mem::GuestMemory;
use tracing::{debug, error, info};

use crate::kernel::status::*;
use crate::kernel::{AllocationType, DisplayMode};
use crate::machine::Machine;

/// Handle written back by `PsCreateSystemThreadEx`.
pub const FAKE_THREAD_HANDLE: u32 = 0xBEEF_0001;

const PAGE_SIZE: u32 = 0x1000;

fn round_up_page(size: u32) -> Option<u32> {
    size.checked_add(PAGE_SIZE - 1).map(|s| s & !(PAGE_SIZE - 1))
}

pub(super) fn av_set_display_mode(m: &mut Machine) {
    let mode = DisplayMode {
        register_base: m.arg(0),
        step: m.arg(1),
        mode: m.arg(2),
        format: m.arg(3),
        pitch: m.arg(4),
        frame_buffer: m.arg(5),
    };
    m.kernel.av_set_display_mode(mode);
    m.regs.eax = 0;
}

pub(super) fn ex_allocate_pool(m: &mut Machine) {
    let size = m.arg(0);
    m.regs.eax = m.kernel.ex_allocate_pool(&mut m.mem, size, 0);
}

pub(super) fn ex_allocate_pool_with_tag(m: &mut Machine) {
    let (size, tag) = (m.arg(0), m.arg(1));
    m.regs.eax = m.kernel.ex_allocate_pool(&mut m.mem, size, tag);
}

pub(super) fn ex_query_pool_block_size(m: &mut Machine) {
    let block = m.arg(0);
    m.regs.eax = m.kernel.ex_query_pool_block_size(block);
}

pub(super) fn ke_query_performance_counter(m: &mut Machine) {
    let v = m.kernel.query_performance_counter();
    m.regs.set_result64(v);
}

pub(super) fn ke_query_performance_frequency(m: &mut Machine) {
    let v = m.kernel.query_performance_frequency();
    m.regs.set_result64(v);
}

pub(super) fn ke_query_system_time(m: &mut Machine) {
    let out = m.arg(0);
    let now = m.kernel.query_system_time();
    if out != 0 {
        m.mem.write_u64(out, now);
    }
    m.regs.eax = 0;
}

pub(super) fn ke_raise_irql_to_dpc_level(m: &mut Machine) {
    m.regs.eax = u32::from(m.kernel.raise_irql_to_dpc_level());
}

pub(super) fn ke_set_event(m: &mut Machine) {
    let (event, increment, wait) = (m.arg(0), m.arg(1), m.arg(2));
    m.regs.eax = m
        .kernel
        .ke_set_event(&mut m.mem, event, increment, wait as u8 != 0);
}

pub(super) fn ke_wait_for_single_object(m: &mut Machine) {
    // WaitReason and WaitMode (args 1, 2) do not affect a single-threaded wait.
    let (object, alertable, timeout_ptr) = (m.arg(0), m.arg(3), m.arg(4));
    let timeout = (timeout_ptr != 0).then(|| m.mem.read_u64(timeout_ptr) as i64);
    m.regs.eax =
        m.kernel
            .ke_wait_for_single_object(&mut m.mem, object, alertable as u8 != 0, timeout);
}

pub(super) fn ke_delay_execution_thread(m: &mut Machine) {
    let (alertable, interval_ptr) = (m.arg(1), m.arg(2));
    if interval_ptr == 0 {
        m.regs.eax = STATUS_INVALID_PARAMETER;
        return;
    }
    let interval = m.mem.read_u64(interval_ptr) as i64;
    m.regs.eax = m.kernel.delay_execution(alertable as u8 != 0, interval);
}

pub(super) fn kf_raise_irql(m: &mut Machine) {
    let new_irql = m.regs.ecx as u8;
    m.regs.eax = u32::from(m.kernel.raise_irql(new_irql));
}

pub(super) fn kf_lower_irql(m: &mut Machine) {
    let new_irql = m.regs.ecx as u8;
    m.kernel.lower_irql(new_irql);
    m.regs.eax = 0;
}

pub(super) fn mm_allocate_contiguous_memory(m: &mut Machine) {
    let size = m.arg(0);
    m.regs.eax = m.kernel.mm_allocate_contiguous(&mut m.mem, size, PAGE_SIZE);
}

pub(super) fn mm_allocate_contiguous_memory_ex(m: &mut Machine) {
    // Lowest/highest acceptable physical address (args 1, 2) are meaningless without paging.
    let (size, align, protect) = (m.arg(0), m.arg(3), m.arg(4));
    debug!(size, align, protect = format_args!("{protect:#x}"), "contiguous alloc");
    m.regs.eax = m.kernel.mm_allocate_contiguous(&mut m.mem, size, align);
}

pub(super) fn mm_free_contiguous_memory(m: &mut Machine) {
    let addr = m.arg(0);
    m.kernel.mm_free_contiguous(&mut m.mem, addr);
    m.regs.eax = 0;
}

/// Simulated memory is identity-mapped to "physical".
pub(super) fn mm_get_physical_address(m: &mut Machine) {
    m.regs.eax = m.arg(0);
}

pub(super) fn mm_persist_contiguous_memory(m: &mut Machine) {
    let (addr, size, persist) = (m.arg(0), m.arg(1), m.arg(2));
    m.kernel
        .mm_persist_contiguous(addr, size, persist as u8 != 0);
    m.regs.eax = 0;
}

pub(super) fn mm_query_statistics(m: &mut Machine) {
    let stats = m.arg(0);
    m.regs.eax = m.kernel.mm_query_statistics(&mut m.mem, stats);
}

pub(super) fn mm_set_address_protect(m: &mut Machine) {
    let (addr, size, protect) = (m.arg(0), m.arg(1), m.arg(2));
    m.kernel.mm_set_address_protect(addr, size, protect);
    m.regs.eax = 0;
}

/// `NtAllocateVirtualMemory(*BaseAddress, ZeroBits, *RegionSize, AllocationType, Protect)`.
///
/// Everything comes from the bump heap. Committing inside an earlier reservation succeeds
/// without allocating, since reserved heap memory is already backed.
pub(super) fn nt_allocate_virtual_memory(m: &mut Machine) {
    let (base_ptr, size_ptr, ty) = (m.arg(0), m.arg(2), m.arg(3));
    m.regs.eax = allocate_virtual(m, base_ptr, size_ptr, AllocationType::from_bits_truncate(ty));
}

fn allocate_virtual(m: &mut Machine, base_ptr: u32, size_ptr: u32, ty: AllocationType) -> u32 {
    if base_ptr == 0 || size_ptr == 0 {
        return STATUS_INVALID_PARAMETER;
    }
    let base = m.mem.read_u32(base_ptr);
    let Some(size) = round_up_page(m.mem.read_u32(size_ptr)).filter(|&s| s != 0) else {
        return STATUS_INVALID_PARAMETER;
    };

    if base != 0 && !ty.contains(AllocationType::RESERVE) {
        debug!(base = format_args!("{base:#010x}"), size, "commit within reservation");
        m.mem.write_u32(size_ptr, size);
        return STATUS_SUCCESS;
    }

    let addr = m.mem.alloc_from_heap(size, PAGE_SIZE);
    if addr == 0 {
        return STATUS_NO_MEMORY;
    }
    if base != 0 {
        debug!(
            requested = format_args!("{base:#010x}"),
            addr = format_args!("{addr:#010x}"),
            "reservation moved"
        );
    }
    m.mem.write_u32(base_ptr, addr);
    m.mem.write_u32(size_ptr, size);
    STATUS_SUCCESS
}

/// `NtFreeVirtualMemory(*BaseAddress, *RegionSize, FreeType)`. A release clears `*BaseAddress`.
pub(super) fn nt_free_virtual_memory(m: &mut Machine) {
    let (base_ptr, size_ptr, free_type) = (m.arg(0), m.arg(1), m.arg(2));
    let base = if base_ptr != 0 {
        m.mem.read_u32(base_ptr)
    } else {
        0
    };
    if base == 0 {
        m.regs.eax = STATUS_INVALID_PARAMETER;
        return;
    }
    let release = AllocationType::from_bits_truncate(free_type).contains(AllocationType::RELEASE);
    let size = if release || size_ptr == 0 {
        0
    } else {
        m.mem.read_u32(size_ptr)
    };
    let status = m.kernel.nt_free_virtual_memory(&mut m.mem, base, size);
    if is_success(status) && release {
        m.mem.write_u32(base_ptr, 0);
    }
    m.regs.eax = status;
}

pub(super) fn nt_close(m: &mut Machine) {
    let handle = m.arg(0);
    m.regs.eax = m.kernel.nt_close(handle);
}

/// `NtCreateEvent(*EventHandle, ObjectAttributes, EventType, InitialState)`.
pub(super) fn nt_create_event(m: &mut Machine) {
    let (handle_ptr, event_type, initial) = (m.arg(0), m.arg(2), m.arg(3));
    if handle_ptr == 0 {
        m.regs.eax = STATUS_INVALID_PARAMETER;
        return;
    }
    m.regs.eax = match m.kernel.nt_create_event(event_type, initial as u8 != 0) {
        Ok(handle) => {
            m.mem.write_u32(handle_ptr, handle);
            STATUS_SUCCESS
        }
        Err(status) => status,
    };
}

/// `NtSetEvent(EventHandle, *PreviousState)`.
pub(super) fn nt_set_event(m: &mut Machine) {
    let (handle, prev_ptr) = (m.arg(0), m.arg(1));
    m.regs.eax = match m.kernel.nt_set_event(handle) {
        Ok(prev) => {
            if prev_ptr != 0 {
                m.mem.write_u32(prev_ptr, prev);
            }
            STATUS_SUCCESS
        }
        Err(status) => status,
    };
}

pub(super) fn nt_wait_for_single_object(m: &mut Machine) {
    let (handle, alertable, timeout_ptr) = (m.arg(0), m.arg(1), m.arg(2));
    let timeout = (timeout_ptr != 0).then(|| m.mem.read_u64(timeout_ptr) as i64);
    m.regs.eax = m
        .kernel
        .nt_wait_for_single_object(handle, alertable as u8 != 0, timeout);
}

pub(super) fn nt_yield_execution(m: &mut Machine) {
    m.regs.eax = m.kernel.nt_yield_execution();
}

pub(super) fn obf_dereference_object(m: &mut Machine) {
    let object = m.regs.ecx;
    m.kernel.obf_dereference_object(object);
    m.regs.eax = 0;
}

/// `PsCreateSystemThreadEx(*ThreadHandle, ExtraSize, KernelStackSize, TlsDataSize, *ThreadId,
/// StartContext1, StartContext2, CreateSuspended, DebugStack, SystemRoutine)`.
///
/// No host thread is created: the system routine runs to completion on the caller's stack,
/// entered as if called with `(StartContext1, StartContext2)`.
pub(super) fn ps_create_system_thread_ex(m: &mut Machine) {
    let handle_ptr = m.arg(0);
    let (context1, context2) = (m.arg(5), m.arg(6));
    let routine = m.arg(9);

    info!(
        routine = format_args!("{routine:#010x}"),
        context1 = format_args!("{context1:#010x}"),
        context2 = format_args!("{context2:#010x}"),
        "system thread start"
    );

    if handle_ptr != 0 {
        m.mem.write_u32(handle_ptr, FAKE_THREAD_HANDLE);
    }

    if routine != 0 {
        match m.lookup(routine) {
            Some(entry) => {
                let saved = m.regs.esp;
                m.push32(context2);
                m.push32(context1);
                m.push32(0);
                entry.invoke(m);
                m.regs.esp = saved;
                info!(eax = format_args!("{:#010x}", m.regs.eax), "system thread returned");
            }
            None => error!(
                routine = format_args!("{routine:#010x}"),
                "system thread routine has no translated function"
            ),
        }
    }

    m.regs.eax = STATUS_SUCCESS;
}

pub(super) fn ps_terminate_system_thread(m: &mut Machine) {
    let status = m.arg(0);
    info!(status = format_args!("{status:#010x}"), "system thread terminated");
    m.kernel.thread_terminated(status);
    m.regs.eax = 0;
}

pub(super) fn rtl_enter_critical_section(m: &mut Machine) {
    let cs = m.arg(0);
    m.kernel.rtl_enter_critical_section(&mut m.mem, cs);
    m.regs.eax = 0;
}

pub(super) fn rtl_initialize_critical_section(m: &mut Machine) {
    let cs = m.arg(0);
    m.kernel.rtl_initialize_critical_section(&mut m.mem, cs);
    m.regs.eax = 0;
}

pub(super) fn rtl_leave_critical_section(m: &mut Machine) {
    let cs = m.arg(0);
    m.kernel.rtl_leave_critical_section(&mut m.mem, cs);
    m.regs.eax = 0;
}

pub(super) fn hal_is_reset_or_shutdown_pending(m: &mut Machine) {
    m.regs.eax = u32::from(m.kernel.hal_is_reset_or_shutdown_pending());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(round_up_page(0), Some(0));
        assert_eq!(round_up_page(1), Some(PAGE_SIZE));
        assert_eq!(round_up_page(PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(round_up_page(u32::MAX), None);
    }
}
