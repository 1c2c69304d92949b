//! Runtime for statically recompiled console code.
//!
//! Translated functions are plain `fn(&mut Machine)`. They share one [`Machine`]: the register
//! slots, the simulated address space, the kernel services and the two function registries.
//! Calls through function pointers go through [`Machine::call_indirect`], which consults the
//! generated registry, then the hand-written overrides, then the kernel bridge's synthetic
//! address range.
#![forbid(unsafe_code)]

pub mod bridge;
mod callable;
pub mod config;
pub mod dispatch;
mod error;
pub mod kernel;
mod machine;
pub mod thread_start;

pub use bridge::{
    Convention, Export, ExportCatalog, ImportTable, KernelBridge, ResolutionReport, SlotInfo,
    SlotKind, FUNCTION_BASE, ORDINAL_FLAG,
};
pub use callable::Callable;
pub use config::{ConfigError, RuntimeConfig};
pub use dispatch::{DispatchTable, DispatchTableBuilder, Registries, TranslatedFn};
pub use error::{BootError, BridgeError, DispatchError};
pub use kernel::{HostKernel, KernelServices, NtStatus};
pub use machine::{BootOptions, Machine};
