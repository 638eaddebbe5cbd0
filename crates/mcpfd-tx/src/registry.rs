//! Static per-slot description: where each slot lives and the bus
//! transactions that fill and arm it.

use bytes::{BufMut, BytesMut};
use mcpfd_bus::command::{self, Instruction, COMMAND_LEN};
use mcpfd_bus::regs::{self, CAN_FIFOCON_TXREQ, CAN_FIFOCON_UINC};
use mcpfd_bus::{SimConfig, Transfer};
use mcpfd_frame::{TefRecord, TxObject, TX_OBJECT_HEADER_LEN};
use serde::Serialize;

use crate::config::TxConfig;
use crate::ownership::full_mask;

/// Byte written to FIFOCON+1 to request transmission and advance the FIFO.
const TRIGGER_BYTE: u8 = ((CAN_FIFOCON_TXREQ | CAN_FIFOCON_UINC) >> 8) as u8;
/// Byte written to FIFOCON+1 to withdraw a pending request.
const ABORT_BYTE: u8 = 0;

/// One transmit slot.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    index: usize,
    fifo: u8,
    ram_offset: u16,
    fill_header: [u8; COMMAND_LEN],
    trigger: Transfer,
    abort: Transfer,
}

impl SlotInfo {
    fn new(index: usize, fifo: u8, ram_offset: u16) -> Self {
        Self {
            index,
            fifo,
            ram_offset,
            fill_header: command::encode(Instruction::Write, regs::ram_addr(ram_offset)),
            trigger: Transfer::write(regs::fifocon(fifo) + 1, &[TRIGGER_BYTE]),
            abort: Transfer::write(regs::fifocon(fifo) + 1, &[ABORT_BYTE]),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Hardware FIFO backing this slot.
    pub fn fifo(&self) -> u8 {
        self.fifo
    }

    /// Offset of the message object in device RAM.
    pub fn ram_offset(&self) -> u16 {
        self.ram_offset
    }

    pub fn fill_header(&self) -> [u8; COMMAND_LEN] {
        self.fill_header
    }

    /// Write of `object` into this slot's message object.
    pub fn fill_transfer(&self, object: &TxObject) -> Transfer {
        let mut buf = BytesMut::with_capacity(COMMAND_LEN + object.encoded_len());
        buf.put_slice(&self.fill_header);
        object.encode(&mut buf);
        Transfer::from_bytes(buf.freeze())
    }

    /// Single-byte write arming this slot's FIFO.
    pub fn trigger_transfer(&self) -> Transfer {
        self.trigger.clone()
    }

    /// Single-byte write clearing TXREQ, which makes the controller abort
    /// a transmission still pending on this slot's FIFO.
    pub fn abort_transfer(&self) -> Transfer {
        self.abort.clone()
    }
}

/// Placement of the transmit-event ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TefLayout {
    pub offset: u16,
    pub count: usize,
    pub record_size: usize,
    pub timestamp: bool,
}

impl TefLayout {
    /// Bus address of record `index`.
    pub fn record_addr(&self, index: usize) -> u16 {
        regs::ram_addr(self.offset + (index * self.record_size) as u16)
    }
}

/// Every slot of a pipeline, built once at attach.
#[derive(Debug, Clone)]
pub struct SlotRegistry {
    slots: Vec<SlotInfo>,
    tef: TefLayout,
    first_fifo: u8,
}

impl SlotRegistry {
    /// Lay out the event ring at the start of device RAM, followed by one
    /// message object per slot.
    pub fn new(config: &TxConfig) -> Self {
        let tef = TefLayout {
            offset: 0,
            count: config.tef_count,
            record_size: TefRecord::record_len(config.tef_timestamp),
            timestamp: config.tef_timestamp,
        };
        let object_size = TX_OBJECT_HEADER_LEN + config.payload_size;
        let first_object = tef.count * tef.record_size;

        let slots = (0..config.slot_count)
            .map(|index| {
                let fifo = config.first_fifo + index as u8;
                let ram_offset = (first_object + index * object_size) as u16;
                SlotInfo::new(index, fifo, ram_offset)
            })
            .collect();

        Self {
            slots,
            tef,
            first_fifo: config.first_fifo,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&SlotInfo> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[SlotInfo] {
        &self.slots
    }

    pub fn tef(&self) -> TefLayout {
        self.tef
    }

    /// Slot backed by hardware FIFO `fifo`.
    pub fn slot_for_fifo(&self, fifo: u8) -> Option<usize> {
        let index = fifo.checked_sub(self.first_fifo)? as usize;
        (index < self.slots.len()).then_some(index)
    }

    /// Translate a per-FIFO register bitmask into a slot bitmask.
    pub fn fifo_mask_to_slots(&self, fifo_mask: u32) -> u32 {
        fifo_mask.checked_shr(u32::from(self.first_fifo)).unwrap_or(0) & full_mask(self.len())
    }

    /// Translate a slot bitmask into the per-FIFO register bitmask.
    pub fn slot_mask_to_fifos(&self, slot_mask: u32) -> u32 {
        (slot_mask & full_mask(self.len()))
            .checked_shl(u32::from(self.first_fifo))
            .unwrap_or(0)
    }

    /// Simulated controller programmed with this layout.
    pub fn sim_config(&self) -> SimConfig {
        let mut config = SimConfig::new(self.tef.count, self.tef.timestamp);
        config.tef_offset = self.tef.offset;
        self.slots
            .iter()
            .fold(config, |config, slot| config.with_fifo(slot.fifo, slot.ram_offset))
    }
}
