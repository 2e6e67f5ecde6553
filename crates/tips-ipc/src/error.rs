use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("shared memory operation failed: {0}")]
    Os(#[from] std::io::Error),

    #[error("segment '{0}' does not exist and ownership=attach was requested")]
    NoSuchSegment(String),

    #[error("segment '{0}' already exists and ownership=own was requested")]
    AlreadyExists(String),

    #[error("segment '{name}' version mismatch: local capacity_bits={local_capacity_bits} slot_size={local_slot_size}, on-disk capacity_bits={disk_capacity_bits} slot_size={disk_slot_size}")]
    VersionMismatch {
        name: String,
        local_capacity_bits: u8,
        local_slot_size: usize,
        disk_capacity_bits: u8,
        disk_slot_size: usize,
    },

    #[error("attachment pool exhausted: no block of at least {0} bytes available")]
    PoolExhausted(usize),

    #[error("reader {0} has no free slot in this segment's IpcCapacity")]
    NoFreeReaderSlot(usize),
}

pub type Result<T> = std::result::Result<T, IpcError>;
