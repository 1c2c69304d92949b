mod common;

use std::sync::Arc;

use proptest::prelude::*;
use recomp_mem::{GuestMemory, HeapReserver};
use recomp_runtime::bridge::{FAKE_THREAD_HANDLE, IMPORT_ORDINALS};
use recomp_runtime::kernel::status::{STATUS_INVALID_PARAMETER, STATUS_SUCCESS};
use recomp_runtime::kernel::DisplayMode;
use recomp_runtime::{
    BootError, BootOptions, BridgeError, Callable, Convention, DispatchTable, Export,
    ExportCatalog, HostKernel, ImportTable, Machine, Registries, SlotKind, TranslatedFn,
    FUNCTION_BASE, ORDINAL_FLAG,
};

use common::*;

fn noop(_m: &mut Machine) {}

fn boot_err(table: ImportTable, image: Vec<u8>) -> BootError {
    let opts = BootOptions {
        reserver: Box::new(HeapReserver),
        layout: small_layout(),
        kernel: Box::new(HostKernel::new()),
        import_table: table,
        catalog: ExportCatalog::standard(),
    };
    let registries = Arc::new(Registries::default());
    Machine::boot_with(&image, registries, small_config(), opts).unwrap_err()
}

#[test]
fn standard_table_resolves_every_slot() {
    let (m, report) = boot_small(
        IMPORT_ORDINALS.to_vec(),
        ExportCatalog::standard(),
        DispatchTable::default(),
    );
    assert_eq!(report.resolved, 147);
    assert_eq!(report.data, 16);
    assert_eq!(report.bridged, 34);
    assert_eq!(report.unbridged, 147 - 16 - 34);
    assert_eq!((report.unknown, report.mismatched), (0, 0));
    assert_eq!(report.synthetic_range, FUNCTION_BASE..FUNCTION_BASE + 4 * 147);

    let kernel_data = KERNEL_DATA_VA..KERNEL_DATA_VA + 0x1000;
    for slot in 0..147u32 {
        let value = m.mem.read_u32(RDATA_VA + 4 * slot);
        assert_ne!(value, ORDINAL_FLAG | IMPORT_ORDINALS[slot as usize]);
        let info = m.bridge().slot_info(slot as u16).unwrap();
        assert_eq!(info.resolved, value);
        assert_eq!(info.kind.is_function(), m.lookup(value).is_some(), "slot {slot}");
        match info.kind {
            SlotKind::Data(_) => assert!(kernel_data.contains(&value), "slot {slot}"),
            _ => assert_eq!(value, synthetic(slot)),
        }
    }
}

#[test]
fn data_aliases_share_contents() {
    let (m, _) = boot_small(
        vec![326, 355, 327, 356],
        ExportCatalog::standard(),
        DispatchTable::default(),
    );
    assert_eq!(m.mem.read_u32(RDATA_VA), m.mem.read_u32(RDATA_VA + 4));
    assert_eq!(m.mem.read_u32(RDATA_VA + 8), m.mem.read_u32(RDATA_VA + 12));
}

#[test]
fn launch_data_import_points_at_the_launch_page() {
    let (m, _) = boot_small(vec![164], ExportCatalog::standard(), DispatchTable::default());
    let page = m.kernel_data().unwrap().launch_data_page();
    assert!(m.mem.heap_contains(page));
    assert_eq!(m.mem.read_u32(m.mem.read_u32(RDATA_VA)), page);
}

#[test]
fn unencoded_slot_aborts_before_any_write() {
    let table = ImportTable::new(RDATA_VA, vec![1, 2]);
    let mut image = small_image(&table);
    image[4..8].copy_from_slice(&0x1234u32.to_le_bytes());
    match boot_err(table, image) {
        BootError::Bridge(BridgeError::SlotNotEncoded { slot, value }) => {
            assert_eq!((slot, value), (1, 0x1234));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn table_outside_the_map_is_rejected() {
    let encoded = ImportTable::new(RDATA_VA, vec![1, 2]);
    let image = small_image(&encoded);
    let table = ImportTable::new(HEAP_BASE + HEAP_SIZE - 4, vec![1, 2]);
    assert!(matches!(
        boot_err(table, image),
        BootError::Bridge(BridgeError::TableOutOfBounds { slots: 2, .. })
    ));
}

#[test]
fn in_memory_ordinal_wins_over_the_expected_table() {
    let encoded = ImportTable::new(RDATA_VA, vec![324, 126]);
    let image = small_image(&encoded);
    let opts = BootOptions {
        reserver: Box::new(HeapReserver),
        layout: small_layout(),
        kernel: Box::new(HostKernel::new()),
        import_table: ImportTable::new(RDATA_VA, vec![324, 127]),
        catalog: ExportCatalog::standard(),
    };
    let (m, report) =
        Machine::boot_with(&image, Arc::new(Registries::default()), small_config(), opts).unwrap();
    assert_eq!(report.mismatched, 1);
    assert_eq!(m.bridge().slot_info(1).map(|s| s.ordinal), Some(126));
}

#[test]
fn callables_by_slot_kind() {
    let (m, _) = boot_small(vec![324, 126, 1], ExportCatalog::standard(), DispatchTable::default());
    assert!(m.lookup(synthetic(0)).is_none());
    assert!(matches!(m.lookup(synthetic(1)), Some(Callable::Bridge { slot: 1 })));
    assert!(matches!(m.lookup(synthetic(2)), Some(Callable::Stub { slot: 2 })));
    assert!(m.lookup(synthetic(1)).is_some_and(Callable::is_kernel));
    assert!(m.lookup(synthetic(2)).is_some_and(Callable::is_kernel));
    assert!(m.lookup(synthetic(3)).is_none());
    assert!(m.lookup(synthetic(1) + 2).is_none());
}

#[test]
fn performance_counter_fills_edx_eax() {
    let (mut m, _) = boot_small(vec![126, 127], ExportCatalog::standard(), DispatchTable::default());
    m.regs.edx = 0xFFFF_FFFF;
    m.push32(0);
    m.call_indirect(synthetic(1));
    assert_eq!(m.regs.result64(), 3_375_000);

    m.push32(0);
    m.call_indirect(synthetic(0));
    assert!(m.regs.result64() < 3_375_000 * 60);
}

#[test]
fn fastcall_irql_reads_ecx() {
    let (mut m, _) = boot_small(vec![160, 161], ExportCatalog::standard(), DispatchTable::default());
    let esp = m.regs.esp;
    m.regs.ecx = 2;
    m.push32(0);
    m.call_indirect(synthetic(0));
    assert_eq!(m.regs.eax, 0);
    m.regs.ecx = 0;
    m.push32(0);
    m.call_indirect(synthetic(1));
    assert_eq!(m.regs.esp, esp);
}

#[test]
fn physical_address_is_the_simulated_address() {
    let (mut m, _) = boot_small(vec![173], ExportCatalog::standard(), DispatchTable::default());
    let esp = m.regs.esp;
    m.push32(0x0123_4560);
    m.push32(0);
    m.call_indirect(synthetic(0));
    assert_eq!(m.regs.eax, 0x0123_4560);
    assert_eq!(m.regs.esp, esp);
}

#[test]
fn thread_termination_records_the_status_and_returns() {
    let (mut m, _) = boot_small(vec![258], ExportCatalog::standard(), DispatchTable::default());
    let esp = m.regs.esp;
    m.regs.eax = 0xFFFF_FFFF;
    m.push32(0xC0DE);
    m.push32(0);
    m.call_indirect(synthetic(0));

    assert_eq!(m.regs.eax, 0);
    assert_eq!(m.regs.esp, esp);
    let kernel = m.kernel_as::<HostKernel>().unwrap();
    assert_eq!(kernel.exit_statuses(), &[0xC0DE]);
}

#[test]
fn display_mode_reaches_the_kernel() {
    let (mut m, _) = boot_small(vec![3], ExportCatalog::standard(), DispatchTable::default());
    assert_eq!(m.kernel_as::<HostKernel>().unwrap().display_mode(), None);

    let esp = m.regs.esp;
    for a in [0xFD00_0000, 0, 0x0004_0000, 0x1E, 640 * 4, 0x0100_0000].iter().rev() {
        m.push32(*a);
    }
    m.push32(0);
    m.call_indirect(synthetic(0));
    assert_eq!(m.regs.esp, esp);

    let mode = m.kernel_as::<HostKernel>().unwrap().display_mode().unwrap();
    assert_eq!(
        mode,
        DisplayMode {
            register_base: 0xFD00_0000,
            step: 0,
            mode: 0x0004_0000,
            format: 0x1E,
            pitch: 640 * 4,
            frame_buffer: 0x0100_0000,
        }
    );
}

const ROUTINE: u32 = 0x0040_0000;
const SEEN: u32 = DATA_VA + 0x100;

fn record_start(m: &mut Machine) {
    let c1 = m.mem.read_u32(m.regs.esp + 4);
    let c2 = m.mem.read_u32(m.regs.esp + 8);
    m.mem.write_u32(SEEN, c1);
    m.mem.write_u32(SEEN + 4, c2);
    m.regs.eax = 0x77;
    m.regs.esp += 12;
}

#[test]
fn thread_creation_runs_the_routine_in_place() {
    let primary = DispatchTable::from_entries([(ROUTINE, record_start as TranslatedFn)]).unwrap();
    let (mut m, _) = boot_small(vec![255], ExportCatalog::standard(), primary);
    let handle_out = DATA_VA + 0x200;

    let esp = m.regs.esp;
    let args = [handle_out, 0, 0, 0, 0, 0xAAAA, 0xBBBB, 0, 0, ROUTINE];
    for a in args.iter().rev() {
        m.push32(*a);
    }
    m.push32(0);
    m.call_indirect(synthetic(0));

    assert_eq!(m.regs.eax, STATUS_SUCCESS);
    assert_eq!(m.regs.esp, esp);
    assert_eq!(m.mem.read_u32(handle_out), FAKE_THREAD_HANDLE);
    assert_eq!(m.mem.read_u32(SEEN), 0xAAAA);
    assert_eq!(m.mem.read_u32(SEEN + 4), 0xBBBB);
}

#[test]
fn virtual_memory_reserve_then_commit() {
    let (mut m, _) = boot_small(vec![184, 199], ExportCatalog::standard(), DispatchTable::default());
    let base_ptr = DATA_VA + 0x300;
    let size_ptr = DATA_VA + 0x304;
    let esp = m.regs.esp;

    let alloc = |m: &mut Machine, ty: u32| {
        for a in [base_ptr, 0, size_ptr, ty, 4].iter().rev() {
            m.push32(*a);
        }
        m.push32(0);
        m.call_indirect(synthetic(0));
        m.regs.eax
    };

    m.mem.write_u32(base_ptr, 0);
    m.mem.write_u32(size_ptr, 0x1801);
    assert_eq!(alloc(&mut m, 0x3000), STATUS_SUCCESS);
    let base = m.mem.read_u32(base_ptr);
    assert!(m.mem.heap_contains(base));
    assert_eq!(base % 0x1000, 0);
    assert_eq!(m.mem.read_u32(size_ptr), 0x2000);

    // Commit inside the reservation: no new memory.
    let used = m.mem.heap_used();
    assert_eq!(alloc(&mut m, 0x1000), STATUS_SUCCESS);
    assert_eq!(m.mem.read_u32(base_ptr), base);
    assert_eq!(m.mem.heap_used(), used);

    m.mem.write_u32(size_ptr, 0);
    assert_eq!(alloc(&mut m, 0x3000), STATUS_INVALID_PARAMETER);
    assert_eq!(m.regs.esp, esp);

    // Release clears the caller's base pointer.
    for a in [base_ptr, size_ptr, 0x8000].iter().rev() {
        m.push32(*a);
    }
    m.push32(0);
    m.call_indirect(synthetic(1));
    assert_eq!(m.regs.eax, STATUS_SUCCESS);
    assert_eq!(m.mem.read_u32(base_ptr), 0);
    assert_eq!(m.regs.esp, esp);
}

fn catalog_with(convention: Convention, bridged: bool) -> ExportCatalog {
    let export = match convention {
        Convention::Stdcall { argc } => Export::stdcall(900, "Probe", argc),
        Convention::Fastcall { argc } => Export::fastcall(900, "Probe", argc),
        Convention::Cdecl => Export::cdecl(900, "Probe"),
    };
    let export = if bridged { export.bridged(noop) } else { export };
    let mut catalog = ExportCatalog::empty();
    catalog.insert(export);
    catalog
}

fn arb_convention() -> impl Strategy<Value = Convention> {
    prop_oneof![
        (0u8..=12).prop_map(|argc| Convention::Stdcall { argc }),
        (0u8..=6).prop_map(|argc| Convention::Fastcall { argc }),
        Just(Convention::Cdecl),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dispatch_leaves_the_stack_balanced(
        convention in arb_convention(),
        bridged in any::<bool>(),
        cdecl_args in 0u32..8,
        fill in any::<u32>(),
    ) {
        let (mut m, _) = boot_small(
            vec![900],
            catalog_with(convention, bridged),
            DispatchTable::default(),
        );
        let esp = m.regs.esp;
        let stack_args = match convention {
            Convention::Stdcall { argc } => u32::from(argc),
            Convention::Fastcall { argc } => u32::from(argc.saturating_sub(2)),
            Convention::Cdecl => cdecl_args,
        };
        for _ in 0..stack_args {
            m.push32(fill);
        }
        m.push32(0);
        m.call_indirect(synthetic(0));

        // The caller pops cdecl arguments itself.
        if convention == Convention::Cdecl {
            m.regs.esp += 4 * stack_args;
        }
        prop_assert_eq!(m.regs.esp, esp);
    }
}
