//! The game's system-thread start routine, written by hand.
//!
//! In the image this routine begins in the middle of another function: the outer function sets
//! up a structured-exception frame and then falls into the body at `0x001D1824`, which is also
//! the address handed to `PsCreateSystemThreadEx` (minus the prologue). Both ways in share one
//! `ebp`-relative frame, so the body takes the frame pointer as a parameter instead of being
//! split into two functions that would each assume their own.

use recomp_mem::GuestMemory;
use tracing::debug;

use crate::dispatch::{DispatchTable, TranslatedFn};
use crate::machine::Machine;

/// Entry address passed to `PsCreateSystemThreadEx`.
pub const THREAD_START_VA: u32 = 0x001D_1818;

/// Pointer-sized globals and the helper the routine uses.
pub mod imports {
    /// Address of the first byte of per-thread initialized data.
    pub const TLS_DATA_START: u32 = 0x0036_BF7C;
    /// Address one past the last byte of per-thread initialized data.
    pub const TLS_DATA_END: u32 = 0x0036_BF80;
    /// Number of zero-filled bytes following the initialized data.
    pub const TLS_ZERO_FILL: u32 = 0x0036_BF8C;
    /// Import slot called on the way out with the callback's result.
    pub const EXIT_THUNK: u32 = 0x0036_B898;
    /// `stdcall` helper taking one flag, called around the callback.
    pub const DEBUG_TOGGLE: u32 = 0x001D_1628;
}

/// `ebp`-relative layout of the shared frame.
pub struct ThreadStartFrame;

impl ThreadStartFrame {
    /// Start routine from `StartContext1`.
    pub const ROUTINE: u32 = 8;
    /// Its parameter, from `StartContext2`.
    pub const PARAM: u32 = 12;

    // Negative offsets, subtracted from `ebp`.
    pub const TRY_LEVEL: u32 = 4;
    pub const RESULT: u32 = 28;
    pub const THREAD: u32 = 32;
    pub const DEST: u32 = 36;
    pub const DATA_SIZE: u32 = 40;

    /// Bytes of locals below `ebp`.
    pub const LOCALS: u32 = 48;
}

/// How control reached the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStartEntry {
    /// Called as a thread start routine; the frame is built here.
    Direct,
    /// Fell through from the outer function, whose prologue already built the frame at `ebp`.
    TailJump { ebp: u32 },
}

/// Registered at [`THREAD_START_VA`].
pub fn thread_start(m: &mut Machine) {
    run(m, ThreadStartEntry::Direct);
}

pub fn run(m: &mut Machine, entry: ThreadStartEntry) {
    let ebp = match entry {
        ThreadStartEntry::Direct => {
            m.push32(0);
            let ebp = m.regs.esp;
            m.regs.esp = ebp.wrapping_sub(ThreadStartFrame::LOCALS);
            ebp
        }
        ThreadStartEntry::TailJump { ebp } => ebp,
    };
    body(m, ebp);
}

fn body(m: &mut Machine, ebp: u32) {
    use imports::*;
    use ThreadStartFrame as F;

    m.mem.write_u32(ebp - F::TRY_LEVEL, 0);

    // The thread block pointer at 0x28 is read through a dropped `fs:` prefix.
    let thread = m.mem.read_u32(recomp_mem::layout::tib::THREAD);
    m.mem.write_u32(ebp - F::THREAD, thread);

    let dest = m.mem.read_u32(thread + recomp_mem::layout::tib::THREAD_TLS) + 4;
    m.mem.write_u32(ebp - F::DEST, dest);
    m.mem.write_u32(dest - 4, dest);

    let src = m.mem.read_u32(TLS_DATA_START);
    let size = m.mem.read_u32(TLS_DATA_END).wrapping_sub(src);
    m.mem.write_u32(ebp - F::DATA_SIZE, size);
    m.mem.copy_within(src, dest, size as usize);

    let zero_fill = m.mem.read_u32(TLS_ZERO_FILL);
    if zero_fill != 0 {
        m.mem.fill(dest + size, zero_fill as usize, 0);
    }
    debug!(
        dest = format_args!("{dest:#010x}"),
        size,
        zero_fill,
        "thread data initialized"
    );

    m.push32(1);
    m.push32(0);
    m.call(DEBUG_TOGGLE);

    let param = m.mem.read_u32(ebp + F::PARAM);
    let routine = m.mem.read_u32(ebp + F::ROUTINE);
    m.push32(param);
    m.push32(0);
    m.call_indirect(routine);
    m.mem.write_u32(ebp - F::RESULT, m.regs.eax);

    m.push32(0);
    m.push32(0);
    m.call(DEBUG_TOGGLE);

    m.mem.write_u32(ebp - F::TRY_LEVEL, u32::MAX);

    let result = m.mem.read_u32(ebp - F::RESULT);
    let exit = m.mem.read_u32(EXIT_THUNK);
    m.push32(result);
    m.push32(0);
    m.call_indirect(exit);

    m.regs.esp = ebp + 4;
}

/// Hand-written functions the generated registry lacks.
pub fn manual_registry() -> DispatchTable {
    let entries: [(u32, TranslatedFn); 1] = [(THREAD_START_VA, thread_start)];
    DispatchTable::from_entries(entries).unwrap_or_default()
}
