//! Kernel data exports.
//!
//! The game dereferences data exports directly through the import table, so their contents must
//! live in simulated memory. They are laid out at fixed offsets inside the kernel data area.

use recomp_mem::layout::{KERNEL_DATA_SIZE, THREAD_BLOCK_OFFSET};
use recomp_mem::{AddressSpace, GuestMemory};
use tracing::debug;

pub const HARDWARE_FLAGS: u32 = 0x0000_0020;
pub const GPU_REVISION: u8 = 0xD2;
pub const MCP_REVISION: u8 = 0xD4;

/// Major, minor, build, QFE.
pub const KERNEL_VERSION: [u16; 4] = [1, 0, 5849, 1];

pub const IMAGE_FILE_NAME: &[u8] = b"\\Device\\CdRom0\\default.xbe";

const LAUNCH_DATA_PAGE_SIZE: u32 = 0x1000;
const OBJECT_TYPE_POOL_TAG: u32 = 0x18;
const IMAGE_NAME_BUFFER: u32 = 0x0D0;

/// A data export and where it sits in the kernel data area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelDataField {
    HardwareInfo,
    KernelVersion,
    TickCount,
    LaunchDataPage,
    EventObjectType,
    CompletionObjectType,
    DeviceObjectType,
    ThreadObjectType,
    ImageFileName,
    HdKey,
    SignatureKey,
    LanKey,
    AlternateSignatureKeys,
    PublicKeyData,
}

impl KernelDataField {
    pub const ALL: [KernelDataField; 14] = [
        KernelDataField::HardwareInfo,
        KernelDataField::KernelVersion,
        KernelDataField::TickCount,
        KernelDataField::LaunchDataPage,
        KernelDataField::EventObjectType,
        KernelDataField::CompletionObjectType,
        KernelDataField::DeviceObjectType,
        KernelDataField::ThreadObjectType,
        KernelDataField::ImageFileName,
        KernelDataField::HdKey,
        KernelDataField::SignatureKey,
        KernelDataField::LanKey,
        KernelDataField::AlternateSignatureKeys,
        KernelDataField::PublicKeyData,
    ];

    pub fn offset(self) -> u32 {
        match self {
            KernelDataField::HardwareInfo => 0x000,
            KernelDataField::KernelVersion => 0x010,
            KernelDataField::TickCount => 0x020,
            KernelDataField::LaunchDataPage => 0x030,
            KernelDataField::EventObjectType => 0x040,
            KernelDataField::CompletionObjectType => 0x060,
            KernelDataField::DeviceObjectType => 0x080,
            KernelDataField::ThreadObjectType => 0x0A0,
            KernelDataField::ImageFileName => 0x0C0,
            KernelDataField::HdKey => 0x100,
            KernelDataField::SignatureKey => 0x110,
            KernelDataField::LanKey => 0x120,
            KernelDataField::AlternateSignatureKeys => 0x130,
            KernelDataField::PublicKeyData => 0x240,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            KernelDataField::HardwareInfo | KernelDataField::KernelVersion => 8,
            KernelDataField::TickCount | KernelDataField::LaunchDataPage => 4,
            KernelDataField::EventObjectType
            | KernelDataField::CompletionObjectType
            | KernelDataField::DeviceObjectType
            | KernelDataField::ThreadObjectType => 0x20,
            KernelDataField::ImageFileName => 8,
            KernelDataField::HdKey | KernelDataField::SignatureKey | KernelDataField::LanKey => 16,
            KernelDataField::AlternateSignatureKeys => 16 * 16,
            KernelDataField::PublicKeyData => 284,
        }
    }

    fn pool_tag(self) -> Option<[u8; 4]> {
        match self {
            KernelDataField::EventObjectType => Some(*b"Even"),
            KernelDataField::CompletionObjectType => Some(*b"IoCo"),
            KernelDataField::DeviceObjectType => Some(*b"Devi"),
            KernelDataField::ThreadObjectType => Some(*b"Thre"),
            _ => None,
        }
    }
}

/// The populated kernel data area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelData {
    base: u32,
    launch_data_page: u32,
}

impl KernelData {
    /// Writes every data export into the kernel data area of `mem`.
    ///
    /// The launch data page is too large for the area and is taken from the heap instead.
    pub fn install(mem: &mut AddressSpace) -> Self {
        let base = mem.layout().kernel_data;
        mem.fill(base, THREAD_BLOCK_OFFSET as usize, 0);

        let at = |f: KernelDataField| base + f.offset();

        mem.write_u32(at(KernelDataField::HardwareInfo), HARDWARE_FLAGS);
        mem.write_u8(at(KernelDataField::HardwareInfo) + 4, GPU_REVISION);
        mem.write_u8(at(KernelDataField::HardwareInfo) + 5, MCP_REVISION);

        for (i, part) in KERNEL_VERSION.iter().enumerate() {
            mem.write_u16(at(KernelDataField::KernelVersion) + 2 * i as u32, *part);
        }

        let launch_data_page = mem.alloc_from_heap(LAUNCH_DATA_PAGE_SIZE, LAUNCH_DATA_PAGE_SIZE);
        mem.write_u32(at(KernelDataField::LaunchDataPage), launch_data_page);

        for f in KernelDataField::ALL {
            if let Some(tag) = f.pool_tag() {
                mem.write_u32(at(f) + OBJECT_TYPE_POOL_TAG, u32::from_le_bytes(tag));
            }
        }

        let name = at(KernelDataField::ImageFileName);
        let buffer = base + IMAGE_NAME_BUFFER;
        mem.write_u16(name, IMAGE_FILE_NAME.len() as u16);
        mem.write_u16(name + 2, IMAGE_FILE_NAME.len() as u16 + 1);
        mem.write_u32(name + 4, buffer);
        mem.write_from(buffer, IMAGE_FILE_NAME);
        mem.write_u8(buffer + IMAGE_FILE_NAME.len() as u32, 0);

        debug!(
            base = format_args!("{base:#010x}"),
            launch_data_page = format_args!("{launch_data_page:#010x}"),
            "kernel data installed"
        );

        Self {
            base,
            launch_data_page,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn address(&self, field: KernelDataField) -> u32 {
        self.base + field.offset()
    }

    pub fn launch_data_page(&self) -> u32 {
        self.launch_data_page
    }
}
