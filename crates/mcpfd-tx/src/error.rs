/// Errors that can occur in transmit pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// Control-bus error.
    #[error("bus error: {0}")]
    Bus(#[from] mcpfd_bus::BusError),

    /// Frame or event-record encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] mcpfd_frame::FrameError),

    /// Pipeline configuration rejected at attach.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TxError>;
