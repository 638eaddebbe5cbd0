//! CAN identifiers and their packing into the object identifier word.
//!
//! The identifier word keeps the 11-bit base identifier (SID) in bits 0-10
//! and the 18-bit identifier extension (EID) in bits 11-28. An extended
//! 29-bit identifier carries its SID in its top 11 bits.

use crate::error::{FrameError, Result};

/// Largest 11-bit identifier.
pub const SFF_MASK: u32 = 0x0000_07ff;
/// Largest 29-bit identifier.
pub const EFF_MASK: u32 = 0x1fff_ffff;

const SID_BITS: u32 = 11;
const EID_BITS: u32 = 18;
const EID_MASK: u32 = (1 << EID_BITS) - 1;

/// A standard (11-bit) or extended (29-bit) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanId {
    Standard(u16),
    Extended(u32),
}

impl CanId {
    /// Build a standard identifier.
    pub fn standard(id: u16) -> Result<Self> {
        if u32::from(id) > SFF_MASK {
            return Err(FrameError::InvalidIdentifier {
                id: id.into(),
                extended: false,
            });
        }
        Ok(Self::Standard(id))
    }

    /// Build an extended identifier.
    pub fn extended(id: u32) -> Result<Self> {
        if id > EFF_MASK {
            return Err(FrameError::InvalidIdentifier { id, extended: true });
        }
        Ok(Self::Extended(id))
    }

    /// The identifier value.
    pub fn raw(self) -> u32 {
        match self {
            Self::Standard(id) => id.into(),
            Self::Extended(id) => id,
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(self, Self::Extended(_))
    }

    /// Pack into the object identifier word.
    pub fn to_word(self) -> u32 {
        match self {
            Self::Standard(id) => u32::from(id) & SFF_MASK,
            Self::Extended(id) => {
                let sid = (id >> EID_BITS) & SFF_MASK;
                let eid = id & EID_MASK;
                sid | (eid << SID_BITS)
            }
        }
    }

    /// Unpack an object identifier word; `extended` comes from the IDE flag.
    pub fn from_word(word: u32, extended: bool) -> Self {
        let sid = word & SFF_MASK;
        if extended {
            let eid = (word >> SID_BITS) & EID_MASK;
            Self::Extended((sid << EID_BITS) | eid)
        } else {
            Self::Standard(sid as u16)
        }
    }
}

impl std::fmt::Display for CanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard(id) => write!(f, "{id:03x}"),
            Self::Extended(id) => write!(f, "{id:08x}"),
        }
    }
}
