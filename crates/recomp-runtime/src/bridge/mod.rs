//! Kernel thunk bridge.
//!
//! At load time every import slot holds `0x8000_0000 | ordinal`. [`KernelBridge::resolve`]
//! rewrites each slot in place: data exports get the address of their contents in the kernel
//! data area, function exports get a synthetic address `FUNCTION_BASE + 4 * slot` that no
//! translated function occupies. An indirect call landing in that range is routed to
//! [`dispatch`], which plays the part of the kernel entry point: it pops the placeholder
//! return address, runs the marshalling routine and reclaims the arguments.

pub mod catalog;
mod marshal;

use core::ops::Range;

use recomp_mem::{AddressSpace, GuestMemory};
use tracing::{debug, error, info, trace, warn};

use crate::callable::Callable;
use crate::error::BridgeError;
use crate::kernel::{KernelData, KernelDataField};
use crate::machine::Machine;

pub use catalog::{
    Convention, Export, ExportCatalog, ExportKind, MarshalFn, IMPORT_ORDINALS,
};
pub use marshal::FAKE_THREAD_HANDLE;

/// Start of the synthetic address range handed out for function imports.
pub const FUNCTION_BASE: u32 = 0xFE00_0000;

/// Tag bit of an unresolved import slot.
pub const ORDINAL_FLAG: u32 = 0x8000_0000;

/// Where the import table lives and which ordinal each slot is expected to name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTable {
    pub va: u32,
    pub ordinals: Vec<u32>,
}

impl ImportTable {
    /// The shipped image's 147-slot table at the start of the constants section.
    pub fn standard() -> Self {
        Self {
            va: recomp_mem::layout::IMPORT_TABLE_VA,
            ordinals: IMPORT_ORDINALS.to_vec(),
        }
    }

    pub fn new(va: u32, ordinals: Vec<u32>) -> Self {
        Self { va, ordinals }
    }

    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    pub fn slot_address(&self, slot: usize) -> u32 {
        self.va + 4 * slot as u32
    }

    /// Writes every slot in its unresolved `0x8000_0000 | ordinal` form. Used to build test
    /// images.
    pub fn encode_into(&self, image: &mut [u8], file_offset: usize) {
        for (i, ord) in self.ordinals.iter().enumerate() {
            let at = file_offset + 4 * i;
            image[at..at + 4].copy_from_slice(&(ORDINAL_FLAG | ord).to_le_bytes());
        }
    }
}

/// How a slot was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Data(KernelDataField),
    /// Function with a marshalling routine.
    Bridged,
    /// Known function without a marshalling routine; calls return a fixed status.
    Unbridged,
    /// Ordinal missing from the catalog; treated like [`SlotKind::Unbridged`].
    Unknown,
}

impl SlotKind {
    pub fn is_function(self) -> bool {
        !matches!(self, SlotKind::Data(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot: u16,
    pub ordinal: u32,
    pub name: Option<&'static str>,
    pub kind: SlotKind,
    /// Value written into the slot.
    pub resolved: u32,
    pub convention: Convention,
}

#[derive(Clone, Copy)]
struct SlotEntry {
    info: SlotInfo,
    marshal: Option<MarshalFn>,
}

/// Counts produced by [`KernelBridge::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolved: usize,
    pub data: usize,
    pub bridged: usize,
    pub unbridged: usize,
    pub unknown: usize,
    /// Slots whose in-memory ordinal differed from the expected table.
    pub mismatched: usize,
    pub synthetic_range: Range<u32>,
}

#[derive(Clone, Default)]
pub struct KernelBridge {
    table_va: u32,
    slots: Vec<SlotEntry>,
    calls: u64,
    unbridged_calls: u64,
}

impl core::fmt::Debug for KernelBridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelBridge")
            .field("table_va", &format_args!("{:#010x}", self.table_va))
            .field("slots", &self.slots.len())
            .field("calls", &self.calls)
            .field("unbridged_calls", &self.unbridged_calls)
            .finish()
    }
}

impl KernelBridge {
    /// Resolves every slot of `table` in `mem`.
    ///
    /// Nothing is written unless every slot holds an encoded ordinal. The table is made
    /// writable for the duration of the rewrite and read-only again afterwards.
    pub fn resolve(
        mem: &mut AddressSpace,
        table: &ImportTable,
        catalog: &ExportCatalog,
        kernel_data: &KernelData,
    ) -> Result<(Self, ResolutionReport), BridgeError> {
        let slots = table.len();
        let bytes = 4 * slots as u32;
        let fits = slots <= usize::from(u16::MAX)
            && mem.is_guest_address(table.va)
            && (slots == 0 || mem.is_guest_address(table.va + bytes - 1));
        if !fits {
            return Err(BridgeError::TableOutOfBounds {
                va: table.va,
                slots,
            });
        }

        let mut report = ResolutionReport {
            synthetic_range: FUNCTION_BASE..FUNCTION_BASE + bytes,
            ..ResolutionReport::default()
        };
        let mut entries = Vec::with_capacity(slots);

        for (slot, &expected) in table.ordinals.iter().enumerate() {
            let value = mem.read_u32(table.slot_address(slot));
            if value & ORDINAL_FLAG == 0 {
                return Err(BridgeError::SlotNotEncoded { slot, value });
            }
            let ordinal = value & !ORDINAL_FLAG;
            if ordinal != expected {
                warn!(slot, ordinal, expected, "import slot names an unexpected ordinal");
                report.mismatched += 1;
            }

            let synthetic = FUNCTION_BASE + 4 * slot as u32;
            let export = catalog.get(ordinal);
            let (kind, resolved, convention, marshal) = match export.map(|e| e.kind) {
                Some(ExportKind::Data(field)) => {
                    report.data += 1;
                    (
                        SlotKind::Data(field),
                        kernel_data.address(field),
                        Convention::Stdcall { argc: 0 },
                        None,
                    )
                }
                Some(ExportKind::Function {
                    convention,
                    marshal: Some(f),
                }) => {
                    report.bridged += 1;
                    (SlotKind::Bridged, synthetic, convention, Some(f))
                }
                Some(ExportKind::Function {
                    convention,
                    marshal: None,
                }) => {
                    report.unbridged += 1;
                    (SlotKind::Unbridged, synthetic, convention, None)
                }
                None => {
                    warn!(slot, ordinal, "ordinal not in the export catalog");
                    report.unknown += 1;
                    (
                        SlotKind::Unknown,
                        synthetic,
                        Convention::Stdcall { argc: 0 },
                        None,
                    )
                }
            };

            trace!(
                slot,
                ordinal,
                name = export.map(|e| e.name).unwrap_or("?"),
                resolved = format_args!("{resolved:#010x}"),
                "import resolved"
            );

            entries.push(SlotEntry {
                info: SlotInfo {
                    slot: slot as u16,
                    ordinal,
                    name: export.map(|e| e.name),
                    kind,
                    resolved,
                    convention,
                },
                marshal,
            });
        }

        mem.with_writable(table.va, bytes, |mem| {
            for e in &entries {
                mem.write_u32(table.slot_address(usize::from(e.info.slot)), e.info.resolved);
            }
        })
        .map_err(|source| BridgeError::TableUnwritable {
            va: table.va,
            source,
        })?;

        report.resolved = entries.len();
        info!(
            resolved = report.resolved,
            data = report.data,
            bridged = report.bridged,
            unbridged = report.unbridged,
            unknown = report.unknown,
            "import table resolved"
        );

        let bridge = Self {
            table_va: table.va,
            slots: entries,
            calls: 0,
            unbridged_calls: 0,
        };
        Ok((bridge, report))
    }

    pub fn table_va(&self) -> u32 {
        self.table_va
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_info(&self, slot: u16) -> Option<&SlotInfo> {
        self.slots.get(usize::from(slot)).map(|e| &e.info)
    }

    pub fn slots(&self) -> impl Iterator<Item = &SlotInfo> {
        self.slots.iter().map(|e| &e.info)
    }

    /// Slot index behind synthetic address `addr`, if it is one.
    pub fn slot_for_address(&self, addr: u32) -> Option<u16> {
        let off = addr.checked_sub(FUNCTION_BASE)?;
        if off % 4 != 0 {
            return None;
        }
        let slot = off / 4;
        (slot < self.slots.len() as u32).then_some(slot as u16)
    }

    /// The callable behind a synthetic function address. Data slots are not callable.
    pub fn callable(&self, addr: u32) -> Option<Callable> {
        let slot = self.slot_for_address(addr)?;
        match self.slots[usize::from(slot)].info.kind {
            SlotKind::Data(_) => None,
            SlotKind::Bridged => Some(Callable::Bridge { slot }),
            SlotKind::Unbridged | SlotKind::Unknown => Some(Callable::Stub { slot }),
        }
    }

    /// Kernel calls dispatched so far.
    pub fn call_count(&self) -> u64 {
        self.calls
    }

    /// Calls that hit a slot without a marshalling routine.
    pub fn unbridged_call_count(&self) -> u64 {
        self.unbridged_calls
    }
}

/// Runs the kernel call behind `slot` on the current machine state.
///
/// Expects the caller to have pushed the arguments and then a placeholder return address. On
/// return `esp` is back where it was before the arguments were pushed, except for `cdecl`
/// exports whose caller cleans up.
pub(crate) fn dispatch(m: &mut Machine, slot: u16) {
    let Some(entry) = m.bridge.slots.get(usize::from(slot)).copied() else {
        error!(
            slot,
            slots = m.bridge.slots.len(),
            esp = format_args!("{:#010x}", m.regs.esp),
            "kernel call through a slot that does not exist"
        );
        panic!("kernel call through nonexistent import slot {slot}");
    };
    let info = entry.info;

    m.pop32();
    m.bridge.calls += 1;
    if m.bridge.calls <= u64::from(m.config.bridge_log_limit) {
        debug!(
            call = m.bridge.calls,
            slot,
            ordinal = info.ordinal,
            name = info.name.unwrap_or("?"),
            esp = format_args!("{:#010x}", m.regs.esp),
            "kernel call"
        );
    }

    match entry.marshal {
        Some(marshal) => marshal(m),
        None => {
            m.bridge.unbridged_calls += 1;
            warn!(
                slot,
                ordinal = info.ordinal,
                name = info.name.unwrap_or("?"),
                "unbridged kernel call"
            );
            m.regs.eax = m.config.unbridged_status;
        }
    }

    m.regs.esp = m.regs.esp.wrapping_add(info.convention.reclaim_bytes());
}
