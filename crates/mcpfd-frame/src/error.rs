/// Errors that can occur while building or decoding frames.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The payload does not fit the frame type or the slot.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The identifier does not fit its 11- or 29-bit field.
    #[error("identifier {id:#x} out of range (extended: {extended})")]
    InvalidIdentifier { id: u32, extended: bool },

    /// A device record was shorter than its layout requires.
    #[error("truncated record ({len} bytes, expected {expected})")]
    Truncated { len: usize, expected: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
