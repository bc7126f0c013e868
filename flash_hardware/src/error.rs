use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("instrument not connected: {0}")]
    NotConnected(String),
    #[error("read timeout")]
    Timeout,
    #[error("conversion exceeded timeout ({latency_ms} ms > {timeout_ms} ms)")]
    ConversionTimeout { latency_ms: u64, timeout_ms: u64 },
    #[error("instrument fault: {0}")]
    Fault(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
