//! CAN and CAN-FD frames, and their layout in controller RAM.
//!
//! Every transmit slot holds one message object:
//! - A 4-byte little-endian identifier word (SID/EID fields)
//! - A 4-byte little-endian flags word (DLC, IDE, RTR, BRS, FDF, ESI, SEQ)
//! - The payload, zero-padded to a multiple of 4 bytes
//!
//! Finished transmissions are reported through transmit-event records that
//! echo the identifier and flags words and append a timestamp.

pub mod dlc;
pub mod error;
pub mod frame;
pub mod id;
pub mod object;

pub use dlc::{dlc_to_len, len_to_dlc, CANFD_MAX_DLEN, CAN_MAX_DLEN};
pub use error::{FrameError, Result};
pub use frame::{CanFrame, FrameKind};
pub use id::CanId;
pub use object::{TefRecord, TxObject, TX_OBJECT_HEADER_LEN};
