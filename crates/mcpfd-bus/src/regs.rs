//! Register map of the controller, limited to what the transmit path uses.

/// Start of device RAM in the bus address space.
pub const RAM_START: u16 = 0x400;
/// Size of device RAM in bytes.
pub const RAM_SIZE: usize = 2048;
/// Size of the SFR/CAN register file in bytes.
pub const REGISTER_SPACE: usize = 0x400;

/// Number of FIFOs, including the transmit queue at index 0.
pub const FIFO_COUNT: u8 = 32;

pub const CAN_INT: u16 = 0x01c;
pub const CAN_INT_TXIF: u32 = 1 << 0;
pub const CAN_INT_TEFIF: u32 = 1 << 4;
pub const CAN_INT_TXATIF: u32 = 1 << 10;

pub const CAN_TXIF: u16 = 0x024;
pub const CAN_TXATIF: u16 = 0x02c;
pub const CAN_TXREQ: u16 = 0x030;

pub const CAN_TEFCON: u16 = 0x040;
pub const CAN_TEFCON_UINC: u32 = 1 << 8;
pub const CAN_TEFSTA: u16 = 0x044;
pub const CAN_TEFSTA_TEFNEIF: u32 = 1 << 0;

pub const CAN_FIFOCON_UINC: u32 = 1 << 8;
pub const CAN_FIFOCON_TXREQ: u32 = 1 << 9;

pub const CAN_FIFOSTA_TXATIF: u32 = 1 << 4;
pub const CAN_FIFOSTA_TXERR: u32 = 1 << 5;
pub const CAN_FIFOSTA_TXLARB: u32 = 1 << 6;
pub const CAN_FIFOSTA_TXABT: u32 = 1 << 7;

/// Status bits cleared when an aborted transmission is acknowledged.
pub const CAN_FIFOSTA_ABORT_MASK: u32 =
    CAN_FIFOSTA_TXABT | CAN_FIFOSTA_TXLARB | CAN_FIFOSTA_TXERR | CAN_FIFOSTA_TXATIF;

/// Control register of `fifo` (FIFO 0 is the transmit queue).
pub const fn fifocon(fifo: u8) -> u16 {
    0x050 + 12 * fifo as u16
}

/// Status register of `fifo`.
pub const fn fifosta(fifo: u8) -> u16 {
    0x054 + 12 * fifo as u16
}

/// Bus address of a device-RAM offset.
pub const fn ram_addr(offset: u16) -> u16 {
    RAM_START + offset
}

/// Byte range `(first, last)` of a 32-bit register covered by `mask`.
///
/// Returns `None` for an empty mask.
pub fn mask_span(mask: u32) -> Option<(usize, usize)> {
    if mask == 0 {
        return None;
    }
    let first = mask.trailing_zeros() as usize / 8;
    let last = (31 - mask.leading_zeros()) as usize / 8;
    Some((first, last))
}
