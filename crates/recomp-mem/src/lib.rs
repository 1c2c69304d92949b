//! Address space manager for statically recompiled console code.
//!
//! The recompiled game embeds absolute 32-bit addresses everywhere, so this crate reserves one
//! contiguous host region that mirrors the console's memory map, copies the image's constant and
//! data sections into place, seeds the low-memory per-thread block and exposes a bump heap.
//!
//! Everything that touches simulated memory goes through [`GuestMemory`]; [`AddressSpace`] is the
//! real backing and [`DenseMemory`] a lightweight stand-in for tests.

mod access;
mod error;
mod heap;
pub mod host;
pub mod layout;
mod space;

pub use access::{DenseMemory, GuestMemory};
pub use error::{AddressSpaceError, Result};
pub use heap::{BumpHeap, MIN_ALIGN};
pub use host::{HeapReserver, HostReserver, Protection, Reservation};
#[cfg(unix)]
pub use host::MmapReserver;
pub use layout::{BasePreference, MemoryLayout, Section};
pub use space::{AddressSpace, SpaceConfig};
