//! Slot ownership tracking.
//!
//! Each slot is in exactly one of five states at any time. The table is a
//! plain per-slot array; the pipeline keeps it behind its ownership lock and
//! every transition goes through [`SlotTable::move_slot`].

use serde::Serialize;

/// Lifecycle state of a transmit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Free for the next submission.
    Idle,
    /// Fill transfer (object image) queued on the bus.
    Filling,
    /// Trigger transfer (request bit) queued on the bus.
    Triggering,
    /// Armed on the controller, waiting for the CAN bus.
    InFlight,
    /// Finished or aborted; reusable after the next restart.
    Completed,
}

impl SlotState {
    pub const ALL: [SlotState; 5] = [
        SlotState::Idle,
        SlotState::Filling,
        SlotState::Triggering,
        SlotState::InFlight,
        SlotState::Completed,
    ];

    /// Whether a bus transfer or a CAN transmission is outstanding.
    pub fn is_in_transit(self) -> bool {
        matches!(
            self,
            SlotState::Filling | SlotState::Triggering | SlotState::InFlight
        )
    }
}

/// Transition messages applied to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    /// Submission took the slot.
    Claimed(usize),
    /// The fill transfer completed.
    Filled(usize),
    /// The trigger transfer completed.
    Triggered(usize),
    /// The controller reported the slot finished or aborted.
    Released(usize),
}

impl SlotEvent {
    pub fn slot(self) -> usize {
        match self {
            SlotEvent::Claimed(slot)
            | SlotEvent::Filled(slot)
            | SlotEvent::Triggered(slot)
            | SlotEvent::Released(slot) => slot,
        }
    }

    /// `(from, to)` states of the transition.
    pub fn transition(self) -> (SlotState, SlotState) {
        match self {
            SlotEvent::Claimed(_) => (SlotState::Idle, SlotState::Filling),
            SlotEvent::Filled(_) => (SlotState::Filling, SlotState::Triggering),
            SlotEvent::Triggered(_) => (SlotState::Triggering, SlotState::InFlight),
            SlotEvent::Released(_) => (SlotState::InFlight, SlotState::Completed),
        }
    }
}

/// A transition whose source state did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot {slot} is {actual:?}, expected {expected:?}")]
pub struct MoveError {
    pub slot: usize,
    pub expected: SlotState,
    pub actual: SlotState,
}

/// The five ownership sets as bitmasks over slot indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub idle: u32,
    pub filling: u32,
    pub triggering: u32,
    pub in_flight: u32,
    pub completed: u32,
}

impl Partition {
    pub fn mask(&self, state: SlotState) -> u32 {
        match state {
            SlotState::Idle => self.idle,
            SlotState::Filling => self.filling,
            SlotState::Triggering => self.triggering,
            SlotState::InFlight => self.in_flight,
            SlotState::Completed => self.completed,
        }
    }

    /// Pairwise disjoint and covering exactly slots `0..slot_count`.
    pub fn is_consistent(&self, slot_count: usize) -> bool {
        let full = full_mask(slot_count);
        let masks = SlotState::ALL.map(|state| self.mask(state));
        let union = masks.iter().fold(0, |acc, mask| acc | mask);
        let total: u32 = masks.iter().map(|mask| mask.count_ones()).sum();
        union == full && total == full.count_ones()
    }
}

/// Per-slot state array.
#[derive(Debug, Clone)]
pub struct SlotTable {
    states: Vec<SlotState>,
}

impl SlotTable {
    /// All `slot_count` slots start idle.
    pub fn new(slot_count: usize) -> Self {
        Self {
            states: vec![SlotState::Idle; slot_count],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    /// Move `slot` from `from` to `to`.
    ///
    /// Fails without touching the table if `slot` is not currently in `from`.
    pub fn move_slot(&mut self, slot: usize, from: SlotState, to: SlotState) -> Result<(), MoveError> {
        let Some(state) = self.states.get_mut(slot) else {
            return Err(MoveError {
                slot,
                expected: from,
                actual: SlotState::Idle,
            });
        };
        if *state != from {
            return Err(MoveError {
                slot,
                expected: from,
                actual: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Apply a transition message.
    pub fn apply(&mut self, event: SlotEvent) -> Result<(), MoveError> {
        let (from, to) = event.transition();
        self.move_slot(event.slot(), from, to)
    }

    /// Lowest-indexed idle slot.
    pub fn first_idle(&self) -> Option<usize> {
        self.states.iter().position(|state| *state == SlotState::Idle)
    }

    pub fn mask(&self, state: SlotState) -> u32 {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == state)
            .fold(0, |mask, (slot, _)| mask | (1 << slot))
    }

    /// True if any slot is idle, filling, triggering or in flight.
    pub fn any_pending(&self) -> bool {
        self.states.iter().any(|state| *state != SlotState::Completed)
    }

    /// True if any slot has a bus transfer or transmission outstanding.
    pub fn any_in_transit(&self) -> bool {
        self.states.iter().any(|state| state.is_in_transit())
    }

    /// Return every completed slot to idle.
    ///
    /// Only done when nothing is idle or in transit; returns whether the
    /// slots were recycled.
    pub fn recycle_completed(&mut self) -> bool {
        if self.any_pending() {
            return false;
        }
        self.states.fill(SlotState::Idle);
        true
    }

    pub fn partition(&self) -> Partition {
        Partition {
            idle: self.mask(SlotState::Idle),
            filling: self.mask(SlotState::Filling),
            triggering: self.mask(SlotState::Triggering),
            in_flight: self.mask(SlotState::InFlight),
            completed: self.mask(SlotState::Completed),
        }
    }
}

/// Bitmask with the low `slot_count` bits set.
pub fn full_mask(slot_count: usize) -> u32 {
    if slot_count >= 32 {
        u32::MAX
    } else {
        (1u32 << slot_count) - 1
    }
}
