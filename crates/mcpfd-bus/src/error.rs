/// Errors that can occur on the control bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus driver refused to queue the transfer.
    #[error("bus busy, transfer rejected")]
    Busy,

    /// The access falls outside the register file or device RAM.
    #[error("address out of range: {addr:#05x} (+{len} bytes)")]
    AddressOutOfRange { addr: u16, len: usize },

    /// The transfer bytes do not form a valid command.
    #[error("malformed transfer: {0}")]
    Malformed(&'static str),

    /// The transfer was accepted but failed while executing.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The bus has been shut down.
    #[error("bus shut down")]
    Shutdown,

    /// An I/O error occurred on the underlying device.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
