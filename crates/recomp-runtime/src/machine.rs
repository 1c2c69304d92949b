//! The context every translated function receives.
//!
//! Translated code reads and writes `m.regs` and `m.mem` directly; everything else is reached
//! through [`Machine::call`] and [`Machine::call_indirect`].

use core::ops::Range;
use std::sync::Arc;

use recomp_cpu::Registers;
use recomp_mem::host::default_reserver;
use recomp_mem::{AddressSpace, HostReserver, MemoryLayout, SpaceConfig};
use tracing::{error, info};

use crate::bridge::{ExportCatalog, ImportTable, KernelBridge, ResolutionReport};
use crate::callable::Callable;
use crate::config::RuntimeConfig;
use crate::dispatch::{DispatchTable, Registries};
use crate::error::{BootError, DispatchError};
use crate::kernel::{HostKernel, KernelData, KernelServices};

/// Everything [`Machine::boot_with`] needs besides the image and the registries.
pub struct BootOptions {
    pub reserver: Box<dyn HostReserver>,
    pub layout: MemoryLayout,
    pub kernel: Box<dyn KernelServices>,
    pub import_table: ImportTable,
    pub catalog: ExportCatalog,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            reserver: default_reserver(),
            layout: MemoryLayout::default(),
            kernel: Box::new(HostKernel::new()),
            import_table: ImportTable::standard(),
            catalog: ExportCatalog::standard(),
        }
    }
}

pub struct Machine {
    pub regs: Registers,
    pub mem: AddressSpace,
    pub kernel: Box<dyn KernelServices>,
    pub(crate) registries: Arc<Registries>,
    pub(crate) bridge: KernelBridge,
    pub(crate) config: RuntimeConfig,
    kernel_data: Option<KernelData>,
}

impl core::fmt::Debug for Machine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Machine")
            .field("regs", &self.regs)
            .field("mem", &self.mem)
            .field("registries", &self.registries)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Assembles a machine from already initialized parts. `esp` starts at the top of the
    /// simulated stack.
    pub fn new(
        mem: AddressSpace,
        registries: Arc<Registries>,
        bridge: KernelBridge,
        kernel: Box<dyn KernelServices>,
        config: RuntimeConfig,
    ) -> Self {
        let regs = Registers::with_stack(mem.layout().stack_top());
        Self {
            regs,
            mem,
            kernel,
            registries,
            bridge,
            config,
            kernel_data: None,
        }
    }

    /// Boots the shipped image with the default host backend, the in-tree kernel services and
    /// the built-in manual registry.
    pub fn boot(
        image: &[u8],
        primary: DispatchTable,
        config: RuntimeConfig,
    ) -> Result<(Self, ResolutionReport), BootError> {
        let registries = Arc::new(Registries::with_builtin_manual(primary));
        Self::boot_with(image, registries, config, BootOptions::default())
    }

    /// Initializes the address space, installs the kernel data exports and resolves the import
    /// table. Any failure leaves nothing reserved.
    pub fn boot_with(
        image: &[u8],
        registries: Arc<Registries>,
        config: RuntimeConfig,
        opts: BootOptions,
    ) -> Result<(Self, ResolutionReport), BootError> {
        let BootOptions {
            mut reserver,
            layout,
            kernel,
            import_table,
            catalog,
        } = opts;

        let space_cfg = SpaceConfig {
            layout,
            candidates: config.candidates.clone(),
        };
        let mut mem = AddressSpace::init_with(image, reserver.as_mut(), &space_cfg)?;
        let kernel_data = KernelData::install(&mut mem);
        let (bridge, report) =
            KernelBridge::resolve(&mut mem, &import_table, &catalog, &kernel_data)?;

        info!(
            base = format_args!("{:#x}", mem.base()),
            translated = registries.primary.count(),
            manual = registries.manual.count(),
            "machine booted"
        );

        let mut m = Self::new(mem, registries, bridge, kernel, config);
        m.kernel_data = Some(kernel_data);
        Ok((m, report))
    }

    #[inline]
    pub fn push32(&mut self, v: u32) {
        self.regs.push32(&mut self.mem, v);
    }

    #[inline]
    pub fn pop32(&mut self) -> u32 {
        self.regs.pop32(&self.mem)
    }

    /// The `n`th stack argument of a callee whose return address has already been popped.
    #[inline]
    pub fn arg(&self, n: u32) -> u32 {
        self.regs.stack_arg(&self.mem, n)
    }

    /// Primary registry, then manual overrides, then the bridge's synthetic range.
    pub fn lookup(&self, addr: u32) -> Option<Callable> {
        self.registries
            .lookup(addr)
            .map(Callable::Translated)
            .or_else(|| self.bridge.callable(addr))
    }

    /// Call to a fixed address from hand-written code, with the return address already pushed.
    #[inline]
    pub fn call(&mut self, addr: u32) {
        self.call_indirect(addr);
    }

    /// Indirect call through a function pointer.
    ///
    /// # Panics
    ///
    /// If `addr` is in no registry and not a callable kernel slot. That means the translation
    /// pipeline missed a function, and there is nothing sensible to run instead.
    pub fn call_indirect(&mut self, addr: u32) {
        if let Err(err) = self.try_call_indirect(addr) {
            let slot = self.bridge.slot_for_address(addr);
            let ordinal = slot
                .and_then(|s| self.bridge.slot_info(s))
                .map(|i| i.ordinal);
            error!(
                addr = format_args!("{addr:#010x}"),
                ?slot,
                ?ordinal,
                esp = format_args!("{:#010x}", self.regs.esp),
                "unresolved indirect call"
            );
            panic!("{err}");
        }
    }

    pub fn try_call_indirect(&mut self, addr: u32) -> Result<(), DispatchError> {
        let target = self.lookup(addr).ok_or(DispatchError::Unresolved { addr })?;
        target.invoke(self);
        Ok(())
    }

    /// See [`Registries::call_all_in_order`].
    pub fn call_all_in_order(&mut self, range: Range<u32>) -> usize {
        let registries = Arc::clone(&self.registries);
        registries.call_all_in_order(self, range)
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn bridge(&self) -> &KernelBridge {
        &self.bridge
    }

    /// The kernel services, if they are a `K`.
    pub fn kernel_as<K: KernelServices + 'static>(&self) -> Option<&K> {
        self.kernel.as_any().downcast_ref::<K>()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Set when the machine came from [`Machine::boot_with`].
    pub fn kernel_data(&self) -> Option<&KernelData> {
        self.kernel_data.as_ref()
    }

    /// Releases the address space. Further memory access panics.
    pub fn shutdown(&mut self) {
        self.mem.shutdown();
    }
}
