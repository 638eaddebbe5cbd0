use mcpfd_bus::regs::{CAN_INT, CAN_INT_TEFIF, CAN_INT_TXATIF, CAN_TXATIF, CAN_TXREQ};
use mcpfd_bus::SpiBus;

use crate::error::Result;

/// Interrupt state fetched once per service pass.
///
/// `txreq` and `txatif` are per-FIFO bitmasks as the controller reports
/// them. `in_flight` is the slot mask that was in flight just before the
/// registers were read, so a slot armed in between never looks finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptStatus {
    pub intf: u32,
    pub txreq: u32,
    pub txatif: u32,
    pub in_flight: u32,
}

impl InterruptStatus {
    /// Read the three status registers; `in_flight` must be sampled first.
    pub fn read<B: SpiBus + ?Sized>(bus: &B, in_flight: u32) -> Result<Self> {
        Ok(Self {
            intf: bus.read_u32(CAN_INT)?,
            txreq: bus.read_u32(CAN_TXREQ)?,
            txatif: bus.read_u32(CAN_TXATIF)?,
            in_flight,
        })
    }

    /// A transmit event is waiting in the ring.
    pub fn tef_pending(&self) -> bool {
        self.intf & CAN_INT_TEFIF != 0
    }

    /// At least one FIFO reported an aborted transmission.
    pub fn abort_pending(&self) -> bool {
        self.intf & CAN_INT_TXATIF != 0 || self.txatif != 0
    }
}
