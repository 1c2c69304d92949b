//! Kernel export catalog: what each ordinal is and how to call it.

use crate::kernel::KernelDataField;
use crate::machine::Machine;

use super::marshal as m;

/// Import table slot order of the shipped image.
pub const IMPORT_ORDINALS: [u32; 147] = [
    1, 2, 3, 4, 8, 15, 16, 17, 23, 24, //
    40, 41, 42, 44, 46, 47, 49, 62, 65, 67, //
    69, 71, 74, 81, 83, 84, 85, 86, 87, 95, //
    97, 98, 99, 100, 107, 109, 113, 119, 124, 126, //
    127, 128, 129, 137, 139, 142, 143, 145, 149, 150, //
    151, 153, 156, 158, 159, 160, 161, 164, 165, 166, //
    168, 169, 170, 171, 173, 175, 176, 178, 179, 180, //
    181, 182, 184, 187, 189, 190, 193, 195, 196, 197, //
    198, 199, 200, 202, 203, 207, 210, 211, 215, 217, //
    218, 219, 222, 225, 226, 228, 233, 234, 236, 238, //
    246, 247, 250, 252, 253, 255, 256, 258, 259, 260, //
    269, 277, 279, 289, 291, 294, 301, 302, 304, 305, //
    308, 312, 322, 323, 324, 325, 326, 327, 328, 335, //
    336, 337, 338, 339, 340, 344, 345, 346, 347, 349, //
    353, 354, 355, 356, 357, 358, 359,
];

/// Reads arguments, calls the service and writes `eax`/`edx`. Runs after the placeholder return
/// address has been popped, so stack argument `n` is at `esp + 4n`.
pub type MarshalFn = fn(&mut Machine);

/// How arguments reach the callee and who removes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// Arguments on the stack; the callee reclaims `4 * argc` bytes.
    Stdcall { argc: u8 },
    /// First two arguments in `ecx`/`edx`, the rest on the stack reclaimed by the callee.
    Fastcall { argc: u8 },
    /// Arguments on the stack; the caller cleans up.
    Cdecl,
}

impl Convention {
    pub fn reclaim_bytes(self) -> u32 {
        match self {
            Convention::Stdcall { argc } => 4 * u32::from(argc),
            Convention::Fastcall { argc } => 4 * u32::from(argc.saturating_sub(2)),
            Convention::Cdecl => 0,
        }
    }
}

#[derive(Clone, Copy)]
pub enum ExportKind {
    Data(KernelDataField),
    Function {
        convention: Convention,
        marshal: Option<MarshalFn>,
    },
}

impl core::fmt::Debug for ExportKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExportKind::Data(field) => f.debug_tuple("Data").field(field).finish(),
            ExportKind::Function {
                convention,
                marshal,
            } => f
                .debug_struct("Function")
                .field("convention", convention)
                .field("bridged", &marshal.is_some())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Export {
    pub ordinal: u32,
    pub name: &'static str,
    pub kind: ExportKind,
}

impl Export {
    pub const fn data(ordinal: u32, name: &'static str, field: KernelDataField) -> Self {
        Self {
            ordinal,
            name,
            kind: ExportKind::Data(field),
        }
    }

    pub const fn stdcall(ordinal: u32, name: &'static str, argc: u8) -> Self {
        Self {
            ordinal,
            name,
            kind: ExportKind::Function {
                convention: Convention::Stdcall { argc },
                marshal: None,
            },
        }
    }

    pub const fn fastcall(ordinal: u32, name: &'static str, argc: u8) -> Self {
        Self {
            ordinal,
            name,
            kind: ExportKind::Function {
                convention: Convention::Fastcall { argc },
                marshal: None,
            },
        }
    }

    pub const fn cdecl(ordinal: u32, name: &'static str) -> Self {
        Self {
            ordinal,
            name,
            kind: ExportKind::Function {
                convention: Convention::Cdecl,
                marshal: None,
            },
        }
    }

    /// Attaches a marshalling routine to a function export.
    pub const fn bridged(self, marshal: MarshalFn) -> Self {
        match self.kind {
            ExportKind::Function { convention, .. } => Self {
                kind: ExportKind::Function {
                    convention,
                    marshal: Some(marshal),
                },
                ..self
            },
            ExportKind::Data(_) => self,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, ExportKind::Data(_))
    }

    pub fn is_bridged(&self) -> bool {
        matches!(
            self.kind,
            ExportKind::Function {
                marshal: Some(_),
                ..
            }
        )
    }
}

use KernelDataField as D;

static STANDARD_EXPORTS: &[Export] = &[
    Export::stdcall(1, "AvGetSavedDataAddress", 0),
    Export::stdcall(2, "AvSendTVEncoderOption", 4),
    Export::stdcall(3, "AvSetDisplayMode", 6).bridged(m::av_set_display_mode),
    Export::stdcall(4, "AvSetSavedDataAddress", 1),
    Export::cdecl(8, "DbgPrint"),
    Export::stdcall(15, "ExAllocatePool", 1).bridged(m::ex_allocate_pool),
    Export::stdcall(16, "ExAllocatePoolWithTag", 2).bridged(m::ex_allocate_pool_with_tag),
    Export::data(17, "ExEventObjectType", D::EventObjectType),
    Export::stdcall(23, "ExQueryNonVolatileSetting", 5),
    Export::stdcall(24, "ExQueryPoolBlockSize", 1).bridged(m::ex_query_pool_block_size),
    Export::stdcall(40, "HalClearSoftwareInterrupt", 1),
    Export::stdcall(41, "HalDisableSystemInterrupt", 1),
    Export::stdcall(42, "HalDiskCachePartitionCount", 0),
    Export::stdcall(44, "HalGetInterruptVector", 2),
    Export::stdcall(46, "HalReadSMCTrayState", 2),
    Export::stdcall(47, "HalReadWritePCISpace", 6),
    Export::stdcall(49, "HalRequestSoftwareInterrupt", 1),
    Export::stdcall(62, "IoBuildDeviceIoControlRequest", 9),
    Export::data(65, "IoCompletionObjectType", D::CompletionObjectType),
    Export::stdcall(67, "IoCreateFile", 10),
    Export::stdcall(69, "IoDeleteDevice", 1),
    Export::data(71, "IoDeviceObjectType", D::DeviceObjectType),
    Export::stdcall(74, "IoInitializeIrp", 3),
    Export::stdcall(81, "IoSetIoCompletion", 5),
    Export::stdcall(83, "IoStartNextPacket", 1),
    Export::stdcall(84, "IoStartNextPacketByKey", 2),
    Export::stdcall(85, "IoStartPacket", 3),
    Export::stdcall(86, "IoSynchronousDeviceIoControlRequest", 8),
    Export::stdcall(87, "IoSynchronousFsdRequest", 5),
    Export::stdcall(95, "KeAlertThread", 2),
    Export::stdcall(97, "KeBugCheck", 1),
    Export::stdcall(98, "KeBugCheckEx", 5),
    Export::stdcall(99, "KeCancelTimer", 1),
    Export::stdcall(100, "KeConnectInterrupt", 1),
    Export::stdcall(107, "KeInitializeDpc", 3),
    Export::stdcall(109, "KeInitializeInterrupt", 7),
    Export::stdcall(113, "KeInitializeTimerEx", 2),
    Export::stdcall(119, "KeInsertQueueDpc", 3),
    Export::stdcall(124, "KeQueryBasePriorityThread", 1),
    Export::stdcall(126, "KeQueryPerformanceCounter", 0).bridged(m::ke_query_performance_counter),
    Export::stdcall(127, "KeQueryPerformanceFrequency", 0)
        .bridged(m::ke_query_performance_frequency),
    Export::stdcall(128, "KeQuerySystemTime", 1).bridged(m::ke_query_system_time),
    Export::stdcall(129, "KeRaiseIrqlToDpcLevel", 0).bridged(m::ke_raise_irql_to_dpc_level),
    Export::stdcall(137, "KeRemoveQueueDpc", 1),
    Export::stdcall(139, "KeRestoreFloatingPointState", 1),
    Export::stdcall(142, "KeSaveFloatingPointState", 1),
    Export::stdcall(143, "KeSetBasePriorityThread", 2),
    Export::stdcall(145, "KeSetEvent", 3).bridged(m::ke_set_event),
    // DueTime is a LARGE_INTEGER and takes two stack slots.
    Export::stdcall(149, "KeSetTimer", 4),
    Export::stdcall(150, "KeSetTimerEx", 5),
    Export::stdcall(151, "KeStallExecutionProcessor", 1),
    Export::stdcall(153, "KeSynchronizeExecution", 3),
    Export::data(156, "KeTickCount", D::TickCount),
    Export::stdcall(158, "KeWaitForMultipleObjects", 8),
    Export::stdcall(159, "KeWaitForSingleObject", 5).bridged(m::ke_wait_for_single_object),
    Export::fastcall(160, "KfRaiseIrql", 1).bridged(m::kf_raise_irql),
    Export::fastcall(161, "KfLowerIrql", 1).bridged(m::kf_lower_irql),
    Export::data(164, "LaunchDataPage", D::LaunchDataPage),
    Export::stdcall(165, "MmAllocateContiguousMemory", 1)
        .bridged(m::mm_allocate_contiguous_memory),
    Export::stdcall(166, "MmAllocateContiguousMemoryEx", 5)
        .bridged(m::mm_allocate_contiguous_memory_ex),
    Export::stdcall(168, "MmClaimGpuInstanceMemory", 2),
    Export::stdcall(169, "MmCreateKernelStack", 2),
    Export::stdcall(170, "MmDeleteKernelStack", 2),
    Export::stdcall(171, "MmFreeContiguousMemory", 1).bridged(m::mm_free_contiguous_memory),
    Export::stdcall(173, "MmGetPhysicalAddress", 1).bridged(m::mm_get_physical_address),
    Export::stdcall(175, "MmLockUnlockBufferPages", 3),
    Export::stdcall(176, "MmLockUnlockPhysicalPage", 2),
    Export::stdcall(178, "MmPersistContiguousMemory", 3)
        .bridged(m::mm_persist_contiguous_memory),
    Export::stdcall(179, "MmQueryAddressProtect", 1),
    Export::stdcall(180, "MmQueryAllocationSize", 1),
    Export::stdcall(181, "MmQueryStatistics", 1).bridged(m::mm_query_statistics),
    Export::stdcall(182, "MmSetAddressProtect", 3).bridged(m::mm_set_address_protect),
    Export::stdcall(184, "NtAllocateVirtualMemory", 5).bridged(m::nt_allocate_virtual_memory),
    Export::stdcall(187, "NtClose", 1).bridged(m::nt_close),
    Export::stdcall(189, "NtCreateEvent", 4).bridged(m::nt_create_event),
    Export::stdcall(190, "NtCreateFile", 9),
    Export::stdcall(193, "NtCreateSemaphore", 4),
    Export::stdcall(195, "NtDeleteFile", 1),
    Export::stdcall(196, "NtDeviceIoControlFile", 10),
    Export::stdcall(197, "NtDuplicateObject", 3),
    Export::stdcall(198, "NtFlushBuffersFile", 2),
    Export::stdcall(199, "NtFreeVirtualMemory", 3).bridged(m::nt_free_virtual_memory),
    Export::stdcall(200, "NtFsControlFile", 10),
    Export::stdcall(202, "NtOpenFile", 6),
    Export::stdcall(203, "NtOpenSymbolicLinkObject", 2),
    Export::stdcall(207, "NtQueryDirectoryFile", 10),
    Export::stdcall(210, "NtQueryFullAttributesFile", 2),
    Export::stdcall(211, "NtQueryInformationFile", 5),
    Export::stdcall(215, "NtQuerySymbolicLinkObject", 3),
    Export::stdcall(217, "NtQueryVirtualMemory", 2),
    Export::stdcall(218, "NtQueryVolumeInformationFile", 5),
    Export::stdcall(219, "NtReadFile", 8),
    Export::stdcall(222, "NtReleaseSemaphore", 3),
    Export::stdcall(225, "NtSetEvent", 2).bridged(m::nt_set_event),
    Export::stdcall(226, "NtSetInformationFile", 5),
    Export::stdcall(228, "NtSetSystemTime", 2),
    Export::stdcall(233, "NtWaitForMultipleObjectsEx", 6),
    Export::stdcall(234, "NtWaitForSingleObject", 3).bridged(m::nt_wait_for_single_object),
    Export::stdcall(236, "NtWriteFile", 8),
    Export::stdcall(238, "NtYieldExecution", 0).bridged(m::nt_yield_execution),
    Export::stdcall(246, "ObReferenceObjectByHandle", 3),
    Export::stdcall(247, "ObReferenceObjectByName", 5),
    Export::fastcall(250, "ObfDereferenceObject", 1).bridged(m::obf_dereference_object),
    Export::stdcall(252, "PhyGetLinkState", 1),
    Export::stdcall(253, "PhyInitialize", 2),
    Export::stdcall(255, "PsCreateSystemThreadEx", 10).bridged(m::ps_create_system_thread_ex),
    Export::stdcall(256, "KeDelayExecutionThread", 3).bridged(m::ke_delay_execution_thread),
    Export::stdcall(258, "PsTerminateSystemThread", 1).bridged(m::ps_terminate_system_thread),
    Export::data(259, "PsThreadObjectType", D::ThreadObjectType),
    Export::stdcall(260, "RtlAnsiStringToUnicodeString", 3),
    Export::stdcall(269, "RtlCompareMemoryUlong", 3),
    Export::stdcall(277, "RtlEnterCriticalSection", 1).bridged(m::rtl_enter_critical_section),
    Export::stdcall(279, "RtlEqualString", 3),
    Export::stdcall(289, "RtlInitAnsiString", 2),
    Export::stdcall(291, "RtlInitializeCriticalSection", 1)
        .bridged(m::rtl_initialize_critical_section),
    Export::stdcall(294, "RtlLeaveCriticalSection", 1).bridged(m::rtl_leave_critical_section),
    Export::stdcall(301, "RtlNtStatusToDosError", 1),
    Export::stdcall(302, "RtlRaiseException", 1),
    Export::stdcall(304, "RtlTimeFieldsToTime", 2),
    Export::stdcall(305, "RtlTimeToTimeFields", 2),
    Export::stdcall(308, "RtlUnicodeStringToAnsiString", 3),
    Export::stdcall(312, "RtlUnwind", 4),
    Export::data(322, "XboxHardwareInfo", D::HardwareInfo),
    Export::data(323, "XboxHDKey", D::HdKey),
    Export::data(324, "XboxKrnlVersion", D::KernelVersion),
    Export::data(325, "XboxSignatureKey", D::SignatureKey),
    Export::data(326, "XboxLANKey", D::LanKey),
    Export::data(327, "XboxAlternateSignatureKeys", D::AlternateSignatureKeys),
    Export::data(328, "XeImageFileName", D::ImageFileName),
    Export::stdcall(335, "WRITE_PORT_BUFFER_USHORT", 3),
    Export::stdcall(336, "WRITE_PORT_BUFFER_ULONG", 3),
    Export::stdcall(337, "XcSHAInit", 1),
    Export::stdcall(338, "XcSHAUpdate", 3),
    Export::stdcall(339, "XcSHAFinal", 2),
    Export::stdcall(340, "XcRC4Key", 3),
    Export::stdcall(344, "XcPKDecPrivate", 3),
    Export::stdcall(345, "XcPKGetKeyLen", 1),
    Export::stdcall(346, "XcVerifyPKCS1Signature", 3),
    Export::stdcall(347, "XcModExp", 5),
    Export::stdcall(349, "XcKeyTable", 3),
    Export::stdcall(353, "XcUpdateCrypto", 2),
    Export::stdcall(354, "RtlRip", 3),
    Export::data(355, "XboxLANKey", D::LanKey),
    Export::data(356, "XboxAlternateSignatureKeys", D::AlternateSignatureKeys),
    Export::data(357, "XePublicKeyData", D::PublicKeyData),
    Export::stdcall(358, "HalIsResetOrShutdownPending", 0)
        .bridged(m::hal_is_reset_or_shutdown_pending),
    Export::stdcall(359, "IoMarkIrpMustComplete", 1),
];

/// Ordinal-indexed export descriptions.
#[derive(Debug, Clone, Default)]
pub struct ExportCatalog {
    exports: Vec<Export>,
}

impl ExportCatalog {
    /// Every export the shipped image imports.
    pub fn standard() -> Self {
        let mut exports = STANDARD_EXPORTS.to_vec();
        exports.sort_by_key(|e| e.ordinal);
        Self { exports }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds `export`, replacing any existing entry for the same ordinal.
    pub fn insert(&mut self, export: Export) -> &mut Self {
        match self.exports.binary_search_by_key(&export.ordinal, |e| e.ordinal) {
            Ok(i) => self.exports[i] = export,
            Err(i) => self.exports.insert(i, export),
        }
        self
    }

    pub fn get(&self, ordinal: u32) -> Option<&Export> {
        self.exports
            .binary_search_by_key(&ordinal, |e| e.ordinal)
            .ok()
            .map(|i| &self.exports[i])
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Export> {
        self.exports.iter()
    }
}
