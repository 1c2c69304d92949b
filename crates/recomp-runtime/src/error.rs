use recomp_mem::AddressSpaceError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("address {addr:#010x} registered twice")]
    Duplicate { addr: u32 },

    #[error("indirect call to {addr:#010x} resolves to no translated function or kernel slot")]
    Unresolved { addr: u32 },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("import table at {va:#010x} could not be made writable")]
    TableUnwritable {
        va: u32,
        #[source]
        source: AddressSpaceError,
    },

    #[error("import table at {va:#010x} with {slots} slots lies outside the address space")]
    TableOutOfBounds { va: u32, slots: usize },

    #[error("import slot {slot} holds {value:#010x}, not an encoded ordinal")]
    SlotNotEncoded { slot: usize, value: u32 },
}

/// Anything that can stop [`crate::Machine::boot`].
#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    AddressSpace(#[from] AddressSpaceError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
