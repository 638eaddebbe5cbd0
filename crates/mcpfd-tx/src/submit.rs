use std::sync::Arc;

use mcpfd_bus::{SpiBus, COMMAND_LEN};
use mcpfd_frame::{CanFrame, TxObject, TX_OBJECT_HEADER_LEN};
use tracing::{debug, error, warn};

use crate::flow::FlowState;
use crate::ownership::{SlotEvent, SlotState};
use crate::pipeline::{Inner, Phase, TransferDone, TxPipeline};
use crate::transport::{TxOutcome, TxTransport};

/// Result of [`TxPipeline::submit`].
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitStatus<H> {
    /// The frame owns `slot` until its completion is reported.
    Accepted { slot: usize },
    /// No slot could take the frame; the handle is returned untouched.
    Busy(H),
    /// The frame can never fit a slot and was not queued.
    Dropped(H),
}

impl<H> SubmitStatus<H> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitStatus::Accepted { .. })
    }
}

impl<B: SpiBus + 'static, T: TxTransport> TxPipeline<B, T> {
    /// Claim an idle slot for `frame` and issue its fill and trigger transfers.
    ///
    /// Both transfers are queued before returning; completion is reported
    /// later through [`TxTransport::on_frame_complete`] with `handle`.
    pub fn submit(&self, frame: &CanFrame, handle: T::Handle) -> SubmitStatus<T::Handle> {
        let inner = &self.inner;
        let mut object = match TxObject::from_frame(frame, inner.config.payload_size) {
            Ok(object) => object,
            Err(err) => {
                warn!(%err, id = %frame.id(), "dropping frame that does not fit a slot");
                inner.stats.record_dropped();
                return SubmitStatus::Dropped(handle);
            }
        };

        let _issue = inner.submit_lock.lock();

        let (slot, generation, fill, trigger) = {
            let mut ledger = inner.ledger.lock();
            let Some(slot) = ledger.table.first_idle() else {
                inner.request_flow(&mut ledger, FlowState::Stopped);
                return SubmitStatus::Busy(handle);
            };
            if let Err(err) = ledger.table.apply(SlotEvent::Claimed(slot)) {
                error!(%err, "claim of idle slot failed");
                return SubmitStatus::Busy(handle);
            }
            if ledger.table.first_idle().is_none() {
                inner.request_flow(&mut ledger, FlowState::Stopped);
            }

            let Some(info) = inner.registry.slot(slot) else {
                error!(slot, "claimed slot missing from registry");
                return SubmitStatus::Busy(handle);
            };
            object.set_seq(info.fifo());
            let fill = info.fill_transfer(&object);
            let trigger = info.trigger_transfer();

            let ctx = &mut ledger.slots[slot];
            ctx.generation += 1;
            ctx.handle = Some(handle);
            ctx.object = Some(object);
            ctx.abandoned = false;
            ctx.failed = false;
            ctx.fill_len = fill.len();
            (slot, ctx.generation, fill, trigger)
        };
        debug!(slot, len = fill.len(), "issuing fill");

        let on_fill = inner.completion(slot, generation, Phase::Fill);
        if let Err(err) = inner.bus.submit_async(fill, on_fill) {
            error!(slot, %err, "fill transfer rejected by bus");
            let mut ledger = inner.ledger.lock();
            if let Err(err) = ledger.table.move_slot(slot, SlotState::Filling, SlotState::Idle) {
                error!(%err, "returning rejected slot failed");
            }
            let ctx = &mut ledger.slots[slot];
            ctx.object = None;
            let handle = ctx.handle.take();
            inner.request_flow(&mut ledger, FlowState::Stopped);
            return match handle {
                Some(handle) => SubmitStatus::Busy(handle),
                None => SubmitStatus::Accepted { slot },
            };
        }

        let on_trigger = inner.completion(slot, generation, Phase::Trigger);
        if let Err(err) = inner.bus.submit_async(trigger, on_trigger) {
            error!(slot, %err, "trigger transfer rejected by bus");
            let mut guard = inner.ledger.lock();
            let ledger = &mut *guard;
            let state = ledger.table.state(slot);
            let ctx = &mut ledger.slots[slot];
            let handle = if ctx.generation == generation {
                ctx.handle.take()
            } else {
                None
            };
            if state == Some(SlotState::Triggering) && ctx.generation == generation {
                ctx.object = None;
                if let Err(err) = ledger.table.move_slot(slot, SlotState::Triggering, SlotState::Idle) {
                    error!(%err, "returning rejected slot failed");
                }
            } else if state == Some(SlotState::Filling) {
                // Returned to idle once the queued fill completes.
                ctx.abandoned = true;
            }
            inner.request_flow(ledger, FlowState::Stopped);
            return match handle {
                Some(handle) => SubmitStatus::Busy(handle),
                None => SubmitStatus::Accepted { slot },
            };
        }

        SubmitStatus::Accepted { slot }
    }
}

impl<B: SpiBus + 'static, T: TxTransport> Inner<B, T> {
    /// Advance a slot after one of its bus transfers ran.
    pub(crate) fn on_transfer_done(self: &Arc<Self>, done: TransferDone) {
        let TransferDone {
            slot,
            generation,
            phase,
            result,
        } = done;

        let mut guard = self.ledger.lock();
        let ledger = &mut *guard;
        let Some(ctx) = ledger.slots.get_mut(slot) else {
            return;
        };
        if ctx.generation != generation {
            debug!(slot, ?phase, "ignoring completion of a superseded submission");
            return;
        }
        if let Err(err) = &result {
            error!(slot, ?phase, %err, "bus transfer failed after acceptance");
            if phase != Phase::Abort {
                ctx.failed = true;
            }
        }

        let mut abort = false;
        let notify = match phase {
            Phase::Fill => {
                if ctx.abandoned {
                    ctx.abandoned = false;
                    ctx.object = None;
                    if let Err(err) = ledger.table.move_slot(slot, SlotState::Filling, SlotState::Idle) {
                        error!(%err, "returning abandoned slot failed");
                    }
                    return;
                }
                ctx.fill_len = COMMAND_LEN + TX_OBJECT_HEADER_LEN;
                if let Err(err) = ledger.table.apply(SlotEvent::Filled(slot)) {
                    error!(%err, "fill completion out of order");
                }
                None
            }
            // The request never reached the controller, so nothing is armed.
            Phase::Trigger if result.is_err() => {
                match ledger
                    .table
                    .move_slot(slot, SlotState::Triggering, SlotState::Completed)
                {
                    Ok(()) => {
                        let ctx = &mut ledger.slots[slot];
                        ctx.object = None;
                        ctx.generation += 1;
                        self.stats.record_error();
                        ctx.handle.take().map(|handle| (handle, TxOutcome::Failed))
                    }
                    Err(err) => {
                        error!(%err, "failing slot out of order");
                        None
                    }
                }
            }
            Phase::Trigger => {
                // A failed fill left a stale object behind an armed request.
                // The slot stays in flight until the abort or the event
                // record for that request releases it.
                abort = ctx.failed;
                if let Err(err) = ledger.table.apply(SlotEvent::Triggered(slot)) {
                    error!(%err, "trigger completion out of order");
                    abort = false;
                } else {
                    debug!(slot, "slot in flight");
                }
                None
            }
            Phase::Abort => return,
        };
        drop(guard);
        self.notify(notify);
        if abort {
            warn!(slot, "fill failed behind an armed request, aborting it");
            self.request_abort(slot, generation);
        }
    }
}
