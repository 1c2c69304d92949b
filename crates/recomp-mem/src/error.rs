use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressSpaceError {
    #[error("no host base could be reserved for {len:#x} bytes ({tried} candidates tried)")]
    NoBaseReservable { len: usize, tried: usize },

    #[error(
        "required section {name} (file offset {file_offset:#x}, {size} bytes) exceeds the \
         {image_len}-byte image"
    )]
    SectionOutOfBounds {
        name: &'static str,
        file_offset: u32,
        size: u32,
        image_len: usize,
    },

    #[error("failed to change protection of {addr:#010x}+{len:#x}: {source}")]
    Protection {
        addr: u32,
        len: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("address space has been shut down")]
    ShutDown,
}

pub type Result<T> = core::result::Result<T, AddressSpaceError>;
