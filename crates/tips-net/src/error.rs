use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("network i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed advertisement record")]
    BadAdvertisement,

    #[error("protocol violation on TCP command stream: {0}")]
    ProtocolViolation(String),

    #[error("config key '{0}' is not recognized")]
    UnknownConfigKey(String),

    #[error("network message type is not WireSafe and cannot cross a host boundary")]
    NotWireSafe,
}

pub type Result<T> = std::result::Result<T, NetError>;
