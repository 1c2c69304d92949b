#![allow(dead_code)]

use std::sync::Arc;

use recomp_mem::layout::{self, BasePreference, MemoryLayout, Section};
use recomp_mem::HeapReserver;
use recomp_runtime::{
    BootOptions, DispatchTable, ExportCatalog, HostKernel, ImportTable, Machine, Registries,
    ResolutionReport, RuntimeConfig,
};

pub const RDATA_VA: u32 = 0x1000;
pub const RDATA_SIZE: u32 = 0x1000;
pub const DATA_VA: u32 = 0x2000;
pub const DATA_SIZE: u32 = 0x2000;
pub const KERNEL_DATA_VA: u32 = 0x5000;
pub const STACK_BASE: u32 = 0x8000;
pub const STACK_SIZE: u32 = 0x8000;
pub const HEAP_BASE: u32 = 0x10000;
pub const HEAP_SIZE: u32 = 0x40000;

/// A few pages laid out like the real map: constants, data, kernel data, stack, heap.
pub fn small_layout() -> MemoryLayout {
    MemoryLayout {
        map_start: 0,
        sections: vec![
            Section {
                name: ".rdata",
                va: RDATA_VA,
                raw_size: RDATA_SIZE,
                file_offset: 0,
                read_only: true,
                required: true,
            },
            Section {
                name: ".data",
                va: DATA_VA,
                raw_size: DATA_SIZE,
                file_offset: RDATA_SIZE,
                read_only: false,
                required: true,
            },
        ],
        kernel_data: KERNEL_DATA_VA,
        stack_base: STACK_BASE,
        stack_size: STACK_SIZE,
        heap_base: HEAP_BASE,
        heap_size: HEAP_SIZE,
    }
}

pub fn small_config() -> RuntimeConfig {
    RuntimeConfig {
        candidates: vec![BasePreference::HostChooses],
        ..RuntimeConfig::default()
    }
}

/// Image bytes for [`small_layout`] with `table` encoded at the start of the constants.
pub fn small_image(table: &ImportTable) -> Vec<u8> {
    let mut image = vec![0u8; (RDATA_SIZE + DATA_SIZE) as usize];
    table.encode_into(&mut image, (table.va - RDATA_VA) as usize);
    image
}

pub fn boot_small(
    ordinals: Vec<u32>,
    catalog: ExportCatalog,
    primary: DispatchTable,
) -> (Machine, ResolutionReport) {
    boot_small_with(ordinals, catalog, primary, small_config())
}

pub fn boot_small_with(
    ordinals: Vec<u32>,
    catalog: ExportCatalog,
    primary: DispatchTable,
    config: RuntimeConfig,
) -> (Machine, ResolutionReport) {
    let table = ImportTable::new(RDATA_VA, ordinals);
    let image = small_image(&table);
    let opts = BootOptions {
        reserver: Box::new(HeapReserver),
        layout: small_layout(),
        kernel: Box::new(HostKernel::new()),
        import_table: table,
        catalog,
    };
    let registries = Arc::new(Registries::with_builtin_manual(primary));
    Machine::boot_with(&image, registries, config, opts).expect("boot")
}

pub fn synthetic(slot: u32) -> u32 {
    recomp_runtime::FUNCTION_BASE + 4 * slot
}

/// Image bytes for the shipped layout: the standard import table plus whatever `patch` writes,
/// addressed by simulated address.
pub fn full_image(patch: impl FnOnce(&mut dyn FnMut(u32, &[u8]))) -> Vec<u8> {
    use recomp_mem::layout::{DATA_FILE_OFFSET, DATA_INIT_SIZE};

    let mut image = vec![0u8; (DATA_FILE_OFFSET + DATA_INIT_SIZE) as usize];
    let table = ImportTable::standard();
    table.encode_into(&mut image, layout::RDATA_FILE_OFFSET as usize);
    let sections = MemoryLayout::default().sections;
    let mut write = |va: u32, bytes: &[u8]| {
        let s = sections
            .iter()
            .find(|s| va >= s.va && va + bytes.len() as u32 <= s.va + s.raw_size)
            .expect("address outside the image's sections");
        let at = (s.file_offset + (va - s.va)) as usize;
        image[at..at + bytes.len()].copy_from_slice(bytes);
    };
    patch(&mut write);
    image
}

pub fn boot_full(
    image: &[u8],
    catalog: ExportCatalog,
    primary: DispatchTable,
) -> (Machine, ResolutionReport) {
    let opts = BootOptions {
        reserver: Box::new(HeapReserver),
        catalog,
        ..BootOptions::default()
    };
    let registries = Arc::new(Registries::with_builtin_manual(primary));
    Machine::boot_with(image, registries, small_config(), opts).expect("boot")
}
