use mcpfd_bus::regs::{CAN_TEFCON, CAN_TEFCON_UINC, CAN_TEFSTA, CAN_TEFSTA_TEFNEIF};
use mcpfd_bus::SpiBus;
use mcpfd_frame::TefRecord;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ownership::SlotState;
use crate::pipeline::{Ledger, TxPipeline};
use crate::status::InterruptStatus;
use crate::transport::{TxOutcome, TxTransport};

impl<B: SpiBus + 'static, T: TxTransport> TxPipeline<B, T> {
    /// Consume transmit events flagged in `status`.
    ///
    /// FIFOs that were in flight and are no longer requested (and did not
    /// abort) each produced one event, so exactly that many records are
    /// read. If that diff is empty while the event interrupt is raised, the
    /// ring is drained one record at a time until the controller reports it
    /// empty. Returns the number of records consumed.
    pub fn handle_tef(&self, status: &InterruptStatus) -> Result<usize> {
        if !status.tef_pending() {
            return Ok(0);
        }

        let registry = &self.inner.registry;
        let in_flight = registry.slot_mask_to_fifos(status.in_flight);
        let finished = (in_flight ^ status.txreq) & in_flight & !status.txatif;
        if finished != 0 {
            debug!(finished = format_args!("{finished:#x}"), "fifos finished");
            for _ in 0..finished.count_ones() {
                self.release_next_event()?;
            }
            return Ok(finished.count_ones() as usize);
        }

        warn!(
            in_flight = format_args!("{in_flight:#x}"),
            txreq = format_args!("{:#x}", status.txreq),
            "event interrupt without finished fifo, scanning event ring"
        );
        self.inner.note_drift("event interrupt without finished fifo");

        let mut consumed = 0;
        while consumed < registry.tef().count
            && self.inner.bus.read_mask(CAN_TEFSTA, CAN_TEFSTA_TEFNEIF)? != 0
        {
            self.release_next_event()?;
            consumed += 1;
        }
        Ok(consumed)
    }

    /// Read the record under the cursor, release its slot and hand the
    /// record back to the controller.
    fn release_next_event(&self) -> Result<()> {
        let inner = &self.inner;
        let tef = inner.registry.tef();

        let mut cursor = inner.tef_cursor.lock();
        let raw = inner.bus.read(tef.record_addr(*cursor), tef.record_size)?;
        let record = TefRecord::decode(&raw, tef.timestamp)?;
        let fifo = record.seq();

        match inner.registry.slot_for_fifo(fifo) {
            Some(slot) => {
                debug!(slot, fifo, ts = ?record.timestamp, "transmit event");
                let done = {
                    let mut ledger = inner.ledger.lock();
                    inner.release(
                        &mut ledger,
                        slot,
                        TxOutcome::Sent {
                            timestamp: record.timestamp,
                        },
                    )
                };
                inner.notify(done);
            }
            None => {
                warn!(fifo, id = record.id, "transmit event for a fifo this pipeline does not own");
                inner.stats.record_mismatch();
                inner.note_drift("event for unknown fifo");
            }
        }

        inner
            .bus
            .write_mask(CAN_TEFCON, CAN_TEFCON_UINC, CAN_TEFCON_UINC)?;
        *cursor = (*cursor + 1) % tef.count;
        Ok(())
    }

    /// Release failed in-flight slots whose FIFO left the controller
    /// without a record naming it.
    ///
    /// A fill that failed behind an armed request sends whatever object was
    /// left in RAM, so its record need not carry the slot's FIFO number.
    /// Nothing is released while a record is still waiting in the ring.
    /// Returns the number of slots released.
    pub(crate) fn release_stranded(&self, status: &InterruptStatus) -> Result<usize> {
        let inner = &self.inner;
        let in_flight = inner.registry.slot_mask_to_fifos(status.in_flight);
        let gone = inner
            .registry
            .fifo_mask_to_slots(in_flight & !status.txreq & !status.txatif);
        let stranded = |ledger: &Ledger<T::Handle>, slot: usize| {
            gone & (1 << slot) != 0
                && ledger.table.state(slot) == Some(SlotState::InFlight)
                && ledger.slots[slot].failed
        };

        let candidates = {
            let ledger = inner.ledger.lock();
            (0..ledger.table.len()).any(|slot| stranded(&*ledger, slot))
        };
        if !candidates || inner.bus.read_mask(CAN_TEFSTA, CAN_TEFSTA_TEFNEIF)? != 0 {
            return Ok(0);
        }

        let mut done = Vec::new();
        {
            let mut ledger = inner.ledger.lock();
            for slot in 0..ledger.table.len() {
                if stranded(&*ledger, slot) {
                    debug!(slot, "failed slot left the controller without its record");
                    done.push(inner.release(&mut ledger, slot, TxOutcome::Failed));
                }
            }
        }
        let released = done.len();
        for notify in done {
            inner.notify(notify);
        }
        Ok(released)
    }

    /// Index of the next event record to read.
    pub fn tef_cursor(&self) -> usize {
        *self.inner.tef_cursor.lock()
    }
}
