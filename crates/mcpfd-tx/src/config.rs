use std::time::Duration;

use mcpfd_bus::regs::{FIFO_COUNT, RAM_SIZE};
use mcpfd_frame::{dlc, TefRecord, CANFD_MAX_DLEN, CAN_MAX_DLEN, TX_OBJECT_HEADER_LEN};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TxError};

/// Configuration for a transmit pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    /// Number of transmit slots.
    pub slot_count: usize,
    /// Hardware FIFO backing slot 0. FIFO 0 is the transmit queue.
    pub first_fifo: u8,
    /// Payload capacity of every slot's message object.
    pub payload_size: usize,
    /// Length of the transmit-event ring.
    pub tef_count: usize,
    /// Event records carry a timestamp word.
    pub tef_timestamp: bool,
    /// Drift occurrences within `drift_window_ms` that raise an alarm. 0 disables alarms.
    pub drift_alarm_threshold: usize,
    /// Drift alarm window in milliseconds.
    pub drift_window_ms: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            slot_count: 4,
            first_fifo: 1,
            payload_size: CANFD_MAX_DLEN,
            tef_count: 4,
            tef_timestamp: true,
            drift_alarm_threshold: 4,
            drift_window_ms: 1000,
        }
    }
}

impl TxConfig {
    pub fn drift_window(&self) -> Duration {
        Duration::from_millis(self.drift_window_ms)
    }

    /// Device RAM taken by the event ring and all slot objects.
    pub fn ram_usage(&self) -> usize {
        self.tef_count * TefRecord::record_len(self.tef_timestamp)
            + self.slot_count * (TX_OBJECT_HEADER_LEN + self.payload_size)
    }

    /// Check the configuration against the controller's limits.
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 || self.slot_count >= FIFO_COUNT as usize {
            return Err(invalid(format!(
                "slot_count {} outside 1..={}",
                self.slot_count,
                FIFO_COUNT - 1
            )));
        }
        if self.first_fifo == 0 {
            return Err(invalid("first_fifo 0 is the transmit queue".to_string()));
        }
        if self.first_fifo as usize + self.slot_count > FIFO_COUNT as usize {
            return Err(invalid(format!(
                "fifos {}..{} exceed the {} available",
                self.first_fifo,
                self.first_fifo as usize + self.slot_count,
                FIFO_COUNT
            )));
        }
        if self.payload_size < CAN_MAX_DLEN
            || self.payload_size > CANFD_MAX_DLEN
            || !dlc::is_valid_len(self.payload_size)
        {
            return Err(invalid(format!(
                "payload_size {} is not a valid object size",
                self.payload_size
            )));
        }
        if self.tef_count < self.slot_count || self.tef_count > FIFO_COUNT as usize {
            return Err(invalid(format!(
                "tef_count {} must be within {}..={}",
                self.tef_count, self.slot_count, FIFO_COUNT
            )));
        }
        if self.ram_usage() > RAM_SIZE {
            return Err(invalid(format!(
                "layout needs {} bytes of device RAM, {} available",
                self.ram_usage(),
                RAM_SIZE
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> TxError {
    TxError::InvalidConfig(message)
}
