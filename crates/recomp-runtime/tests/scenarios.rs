mod common;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use recomp_mem::GuestMemory;
use recomp_runtime::kernel::status::STATUS_NOT_IMPLEMENTED;
use recomp_runtime::kernel::KernelDataField;
use recomp_runtime::{
    DispatchTable, Export, ExportCatalog, Machine, RuntimeConfig, SlotKind, TranslatedFn,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use common::*;

const FLOAT_SRC: u32 = 0x003B_191C;
const FLOAT_DST: u32 = 0x004D_53CC;
const COPY_FN: u32 = 0x0010_2030;

fn copy_float(m: &mut Machine) {
    let v = m.mem.read_f32(FLOAT_SRC);
    m.mem.write_f32(FLOAT_DST, v);
    m.regs.esp = m.regs.esp.wrapping_add(4);
}

#[test]
fn scenario_a_translated_copy_moves_a_constant() {
    let image = full_image(|write| write(FLOAT_SRC, &1.75f32.to_le_bytes()));
    let primary = DispatchTable::from_entries([(COPY_FN, copy_float as TranslatedFn)]).unwrap();
    let (mut m, _) = boot_full(&image, ExportCatalog::standard(), primary);

    assert_eq!(m.mem.read_f32(FLOAT_SRC), 1.75);
    assert_eq!(m.mem.read_u32(FLOAT_DST), 0);

    let esp = m.regs.esp;
    m.push32(0);
    m.call(COPY_FN);

    assert_eq!(m.mem.read_f32(FLOAT_DST), 1.75);
    assert_eq!(m.regs.esp, esp);
    m.shutdown();
}

const ORD_INCREMENT: u32 = 900;
const ORD_UNBRIDGED: u32 = 901;

fn increment(m: &mut Machine) {
    m.regs.eax = m.arg(0).wrapping_add(1);
}

fn scenario_b_catalog() -> ExportCatalog {
    let mut catalog = ExportCatalog::standard();
    catalog
        .insert(Export::stdcall(ORD_INCREMENT, "TestIncrement", 1).bridged(increment))
        .insert(Export::stdcall(ORD_UNBRIDGED, "TestUnbridged", 2));
    catalog
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Counts WARN events whose message mentions `needle`.
struct WarnCounter {
    needle: &'static str,
    hits: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut v = MessageVisitor::default();
        event.record(&mut v);
        if v.0.contains(self.needle) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn scenario_b_data_bridged_and_unbridged_slots() {
    let (mut m, report) = boot_small(
        vec![324, ORD_INCREMENT, ORD_UNBRIDGED],
        scenario_b_catalog(),
        DispatchTable::default(),
    );
    assert_eq!((report.data, report.bridged, report.unbridged), (1, 1, 1));

    // A: data export, dereferenced directly.
    let version = m.mem.read_u32(RDATA_VA);
    assert_eq!(version, KERNEL_DATA_VA + KernelDataField::KernelVersion.offset());
    assert_eq!(m.mem.read_u16(version), 1);
    assert_eq!(m.mem.read_u16(version + 4), 5849);
    assert!(m.lookup(synthetic(0)).is_none());

    // B: one integer argument in, incremented value out.
    let b = m.mem.read_u32(RDATA_VA + 4);
    assert_eq!(b, synthetic(1));
    let esp = m.regs.esp;
    m.push32(41);
    m.push32(0);
    m.call_indirect(b);
    assert_eq!(m.regs.eax, 42);
    assert_eq!(m.regs.esp, esp);

    // C: no routine; exactly one warning and a zero result.
    let hits = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter {
        needle: "unbridged",
        hits: Arc::clone(&hits),
    });
    let c = m.mem.read_u32(RDATA_VA + 8);
    m.regs.eax = 0xDEAD_BEEF;
    tracing::subscriber::with_default(subscriber, || {
        m.push32(7);
        m.push32(8);
        m.push32(0);
        m.call_indirect(c);
    });
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(m.regs.eax, 0);
    assert_eq!(m.regs.esp, esp);
    assert_eq!(m.bridge().unbridged_call_count(), 1);
    assert_eq!(m.bridge().call_count(), 2);
}

#[test]
fn unbridged_status_is_configurable() {
    let config = RuntimeConfig {
        unbridged_status: STATUS_NOT_IMPLEMENTED,
        ..small_config()
    };
    let (mut m, _) = boot_small_with(
        vec![ORD_UNBRIDGED],
        scenario_b_catalog(),
        DispatchTable::default(),
        config,
    );
    m.push32(1);
    m.push32(2);
    m.push32(0);
    m.call_indirect(synthetic(0));
    assert_eq!(m.regs.eax, STATUS_NOT_IMPLEMENTED);
}

#[test]
fn unknown_ordinals_still_get_a_stub() {
    let (mut m, report) = boot_small(vec![4242], ExportCatalog::standard(), DispatchTable::default());
    assert_eq!(report.unknown, 1);
    assert_eq!(m.mem.read_u32(RDATA_VA), synthetic(0));
    assert_eq!(m.bridge().slot_info(0).map(|s| s.kind), Some(SlotKind::Unknown));

    let esp = m.regs.esp;
    m.regs.eax = 5;
    m.push32(0);
    m.call_indirect(synthetic(0));
    assert_eq!(m.regs.eax, 0);
    assert_eq!(m.regs.esp, esp);
}

const ORDER_LOG: u32 = DATA_VA + 0x800;

fn log_entry(m: &mut Machine, tag: u32) {
    let n = m.mem.read_u32(ORDER_LOG);
    m.mem.write_u32(ORDER_LOG + 4 + 4 * n, tag);
    m.mem.write_u32(ORDER_LOG, n + 1);
}

fn init_a(m: &mut Machine) {
    log_entry(m, 0xA);
}

fn init_b(m: &mut Machine) {
    log_entry(m, 0xB);
    // Unbalanced on purpose: the runner restores esp.
    m.regs.esp -= 12;
}

fn outside(m: &mut Machine) {
    log_entry(m, 0xF);
}

#[test]
fn initializers_run_lowest_address_first() {
    let primary = DispatchTable::from_entries([
        (0x0002_0100, init_b as TranslatedFn),
        (0x0002_0000, init_a),
        (0x0003_0000, outside),
    ])
    .unwrap();
    let (mut m, _) = boot_small(vec![], ExportCatalog::standard(), primary);
    let esp = m.regs.esp;

    assert_eq!(m.call_all_in_order(0x0002_0000..0x0003_0000), 2);
    assert_eq!(m.mem.read_u32(ORDER_LOG), 2);
    assert_eq!(m.mem.read_u32(ORDER_LOG + 4), 0xA);
    assert_eq!(m.mem.read_u32(ORDER_LOG + 8), 0xB);
    assert_eq!(m.regs.esp, esp);
}
