use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::dlc::dlc_to_len;
use crate::error::{FrameError, Result};
use crate::frame::CanFrame;
use crate::id::CanId;

/// Identifier word + flags word.
pub const TX_OBJECT_HEADER_LEN: usize = 8;

/// Event record with timestamp: identifier, flags, timestamp.
pub const TEF_RECORD_LEN: usize = 12;
/// Event record without timestamp.
pub const TEF_RECORD_LEN_NO_TS: usize = 8;

pub const FLAGS_DLC_MASK: u32 = 0x0f;
pub const FLAGS_IDE: u32 = 1 << 4;
pub const FLAGS_RTR: u32 = 1 << 5;
pub const FLAGS_BRS: u32 = 1 << 6;
pub const FLAGS_FDF: u32 = 1 << 7;
pub const FLAGS_ESI: u32 = 1 << 8;
pub const FLAGS_SEQ_SHIFT: u32 = 9;
pub const FLAGS_SEQ_MASK: u32 = 0x7f << FLAGS_SEQ_SHIFT;

/// A transmit message object as laid out in controller RAM.
///
/// The sequence sub-field of the flags word is free for software use; the
/// controller echoes it into the matching transmit-event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxObject {
    id: u32,
    flags: u32,
    payload: Bytes,
}

impl TxObject {
    /// Build the object for `frame`, refusing payloads above `max_payload`.
    pub fn from_frame(frame: &CanFrame, max_payload: usize) -> Result<Self> {
        let len = frame.len();
        if len > max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: max_payload,
            });
        }

        let mut flags = u32::from(frame.dlc()) & FLAGS_DLC_MASK;
        if frame.id().is_extended() {
            flags |= FLAGS_IDE;
        }
        if frame.is_remote() {
            flags |= FLAGS_RTR;
        }
        if frame.is_fd() {
            flags |= FLAGS_FDF;
            if frame.brs() {
                flags |= FLAGS_BRS;
            }
            if frame.esi() {
                flags |= FLAGS_ESI;
            }
        }

        let payload = if frame.data().len() == len {
            frame.data().clone()
        } else {
            let mut padded = BytesMut::zeroed(len);
            let copy = frame.data().len().min(len);
            padded[..copy].copy_from_slice(&frame.data()[..copy]);
            padded.freeze()
        };

        Ok(Self {
            id: frame.id().to_word(),
            flags,
            payload,
        })
    }

    /// Store `seq` in the sequence sub-field.
    pub fn set_seq(&mut self, seq: u8) {
        self.flags =
            (self.flags & !FLAGS_SEQ_MASK) | ((u32::from(seq) << FLAGS_SEQ_SHIFT) & FLAGS_SEQ_MASK);
    }

    pub fn seq(&self) -> u8 {
        seq_of(self.flags)
    }

    pub fn id_word(&self) -> u32 {
        self.id
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn can_id(&self) -> CanId {
        CanId::from_word(self.id, self.flags & FLAGS_IDE != 0)
    }

    pub fn dlc(&self) -> u8 {
        (self.flags & FLAGS_DLC_MASK) as u8
    }

    /// Payload length implied by the DLC.
    pub fn payload_len(&self) -> usize {
        dlc_to_len(self.dlc())
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Bytes written to controller RAM, padding included.
    pub fn encoded_len(&self) -> usize {
        TX_OBJECT_HEADER_LEN + padded_len(self.payload.len())
    }

    /// Append the RAM image of this object to `dst`.
    ///
    /// ```text
    /// ┌─────────────┬─────────────┬──────────────────────────────┐
    /// │ ID (4B LE)  │ Flags (4B)  │ Payload, zero-padded to 4B   │
    /// └─────────────┴─────────────┴──────────────────────────────┘
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) {
        let padding = padded_len(self.payload.len()) - self.payload.len();
        dst.reserve(self.encoded_len());
        dst.put_u32_le(self.id);
        dst.put_u32_le(self.flags);
        dst.put_slice(&self.payload);
        dst.put_bytes(0, padding);
    }
}

/// A transmit-event record read back from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TefRecord {
    pub id: u32,
    pub flags: u32,
    pub timestamp: Option<u32>,
}

impl TefRecord {
    /// Size of one record in controller RAM.
    pub fn record_len(with_timestamp: bool) -> usize {
        if with_timestamp {
            TEF_RECORD_LEN
        } else {
            TEF_RECORD_LEN_NO_TS
        }
    }

    /// Decode a record read from controller RAM.
    pub fn decode(mut buf: &[u8], with_timestamp: bool) -> Result<Self> {
        let expected = Self::record_len(with_timestamp);
        if buf.len() < expected {
            return Err(FrameError::Truncated {
                len: buf.len(),
                expected,
            });
        }

        let id = buf.get_u32_le();
        let flags = buf.get_u32_le();
        let timestamp = with_timestamp.then(|| buf.get_u32_le());
        Ok(Self {
            id,
            flags,
            timestamp,
        })
    }

    /// Sequence number copied from the transmitted object.
    pub fn seq(&self) -> u8 {
        seq_of(self.flags)
    }

    pub fn dlc(&self) -> u8 {
        (self.flags & FLAGS_DLC_MASK) as u8
    }

    pub fn can_id(&self) -> CanId {
        CanId::from_word(self.id, self.flags & FLAGS_IDE != 0)
    }
}

fn seq_of(flags: u32) -> u8 {
    ((flags & FLAGS_SEQ_MASK) >> FLAGS_SEQ_SHIFT) as u8
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}
