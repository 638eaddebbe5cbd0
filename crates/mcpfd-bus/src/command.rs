//! SPI command header encoding.
//!
//! A command is 16 bits, sent big-endian: the top nibble is the
//! instruction, the low 12 bits the register or RAM address.

/// Length of the command header that starts every transfer.
pub const COMMAND_LEN: usize = 2;

const ADDRESS_MASK: u16 = 0x0fff;

/// SPI instructions understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Reset = 0x0,
    Write = 0x2,
    Read = 0x3,
}

impl Instruction {
    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(Self::Reset),
            0x2 => Some(Self::Write),
            0x3 => Some(Self::Read),
            _ => None,
        }
    }
}

/// Build the command header for `instruction` at `addr`.
pub fn encode(instruction: Instruction, addr: u16) -> [u8; COMMAND_LEN] {
    (((instruction as u16) << 12) | (addr & ADDRESS_MASK)).to_be_bytes()
}

/// Split a command header into instruction and address.
///
/// Returns `None` if `buf` is shorter than a header or carries an
/// unknown instruction.
pub fn decode(buf: &[u8]) -> Option<(Instruction, u16)> {
    let header: [u8; COMMAND_LEN] = buf.get(..COMMAND_LEN)?.try_into().ok()?;
    let word = u16::from_be_bytes(header);
    let instruction = Instruction::from_nibble((word >> 12) as u8)?;
    Some((instruction, word & ADDRESS_MASK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_header_layout() {
        assert_eq!(encode(Instruction::Write, 0x400), [0x24, 0x00]);
        assert_eq!(encode(Instruction::Read, 0x05d), [0x30, 0x5d]);
    }

    #[test]
    fn address_is_truncated_to_twelve_bits() {
        assert_eq!(encode(Instruction::Write, 0xf123), [0x21, 0x23]);
    }

    #[test]
    fn decode_header() {
        assert_eq!(decode(&[0x24, 0x00, 0xff]), Some((Instruction::Write, 0x400)));
        assert_eq!(decode(&[0x30, 0x44]), Some((Instruction::Read, 0x044)));
    }

    #[test]
    fn decode_rejects_short_or_unknown() {
        assert_eq!(decode(&[0x24]), None);
        assert_eq!(decode(&[0xa0, 0x00]), None);
    }
}
