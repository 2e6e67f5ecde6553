use thiserror::Error;

/// Domain-level errors (spec.md §7): configuration rejects an unknown key
/// or malformed value, IPC/network errors propagate from the transport
/// crates, and `NotWireSafe` is returned by `publish` when a message
/// carrying a network/IPC subscriber isn't trivially destructible.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Ipc(#[from] tips_ipc::IpcError),

    #[error(transparent)]
    Net(#[from] tips_net::NetError),

    #[error("message with tag {0} is not WireSafe but has subscribers beyond this process")]
    NotWireSafe(tips_types::Tag),

    #[error("no reader slots available for this domain's ring")]
    RingExhausted,
}

pub type Result<T> = std::result::Result<T, DomainError>;
