//! Per-device pipeline context.
//!
//! A [`TxPipeline`] owns everything one attached controller needs: the
//! slot registry, the ownership table and flow state (one lock), the lock
//! that keeps fill/trigger pairs together on the bus, the event-ring read
//! cursor and the counters. Submission, completion and abort handling are
//! implemented in their own modules as further `impl TxPipeline` blocks.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use mcpfd_bus::{BusError, Completion, SpiBus};
use mcpfd_frame::TxObject;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::TxConfig;
use crate::drift::DriftMonitor;
use crate::error::Result;
use crate::flow::{FlowControl, FlowState};
use crate::ownership::{Partition, SlotEvent, SlotState, SlotTable};
use crate::registry::SlotRegistry;
use crate::stats::{StatsSnapshot, TxStats};
use crate::status::InterruptStatus;
use crate::transport::{TxOutcome, TxTransport};

const DETACH_POLL: Duration = Duration::from_millis(1);

/// Mutable per-slot bookkeeping kept next to the ownership table.
pub(crate) struct SlotCtx<H> {
    pub(crate) handle: Option<H>,
    pub(crate) object: Option<TxObject>,
    /// Bumped on every claim and forced release; stale bus callbacks are ignored.
    pub(crate) generation: u64,
    /// The trigger was refused after the fill was queued.
    pub(crate) abandoned: bool,
    /// A bus transfer for this submission failed after acceptance; the
    /// slot is reported [`TxOutcome::Failed`] however it is released.
    pub(crate) failed: bool,
    pub(crate) fill_len: usize,
}

impl<H> Default for SlotCtx<H> {
    fn default() -> Self {
        Self {
            handle: None,
            object: None,
            generation: 0,
            abandoned: false,
            failed: false,
            fill_len: 0,
        }
    }
}

/// State guarded by the ownership lock.
pub(crate) struct Ledger<H> {
    pub(crate) table: SlotTable,
    pub(crate) flow: FlowControl,
    pub(crate) slots: Vec<SlotCtx<H>>,
}

/// Which transfer of a submission a bus completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Fill,
    Trigger,
    /// Withdrawal of a request armed over a failed fill.
    Abort,
}

/// Message posted by a bus completion callback.
#[derive(Debug)]
pub(crate) struct TransferDone {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
    pub(crate) phase: Phase,
    pub(crate) result: std::result::Result<(), BusError>,
}

pub(crate) struct Inner<B, T: TxTransport> {
    pub(crate) bus: B,
    pub(crate) transport: T,
    pub(crate) config: TxConfig,
    pub(crate) registry: SlotRegistry,
    pub(crate) ledger: Mutex<Ledger<T::Handle>>,
    pub(crate) submit_lock: Mutex<()>,
    pub(crate) tef_cursor: Mutex<usize>,
    pub(crate) stats: TxStats,
    pub(crate) drift: Mutex<DriftMonitor>,
}

/// Transmit pipeline attached to one controller.
///
/// Cloning yields another handle to the same device context, so the
/// submitting thread and the interrupt thread can each hold one.
pub struct TxPipeline<B, T: TxTransport> {
    pub(crate) inner: Arc<Inner<B, T>>,
}

impl<B, T: TxTransport> Clone for TxPipeline<B, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// What one interrupt service pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    /// Event records consumed.
    pub completed: usize,
    /// Aborted slots released.
    pub aborted: usize,
    /// Completed slots were recycled.
    pub restarted: bool,
}

/// Outcome of [`TxPipeline::detach`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetachReport {
    /// Everything in transit drained before the timeout.
    pub drained: bool,
    /// Slots forcibly released with [`TxOutcome::Aborted`].
    pub aborted: usize,
}

/// Diagnostic view of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub index: usize,
    pub fifo: u8,
    pub state: SlotState,
    pub fill_len: usize,
    /// Payload length of the retained frame image.
    pub frame_len: Option<usize>,
}

impl<B: SpiBus + 'static, T: TxTransport> TxPipeline<B, T> {
    /// Create the device context for `bus`.
    pub fn attach(bus: B, transport: T, config: TxConfig) -> Result<Self> {
        config.validate()?;
        let registry = SlotRegistry::new(&config);
        let slot_count = registry.len();
        info!(
            slots = slot_count,
            first_fifo = config.first_fifo,
            payload_size = config.payload_size,
            tef_count = config.tef_count,
            "transmit pipeline attached"
        );

        let ledger = Ledger {
            table: SlotTable::new(slot_count),
            flow: FlowControl::default(),
            slots: (0..slot_count).map(|_| SlotCtx::default()).collect(),
        };
        let drift = DriftMonitor::new(config.drift_alarm_threshold, config.drift_window());

        Ok(Self {
            inner: Arc::new(Inner {
                bus,
                transport,
                registry,
                ledger: Mutex::new(ledger),
                submit_lock: Mutex::new(()),
                tef_cursor: Mutex::new(0),
                stats: TxStats::default(),
                drift: Mutex::new(drift),
                config,
            }),
        })
    }

    pub fn bus(&self) -> &B {
        &self.inner.bus
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn config(&self) -> &TxConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.inner.registry
    }

    pub fn partition(&self) -> Partition {
        self.inner.ledger.lock().table.partition()
    }

    pub fn flow_state(&self) -> FlowState {
        self.inner.ledger.lock().flow.state()
    }

    /// True while any slot is idle, filling, triggering or in flight.
    pub fn any_pending(&self) -> bool {
        self.inner.ledger.lock().table.any_pending()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn slots(&self) -> Vec<SlotSnapshot> {
        let ledger = self.inner.ledger.lock();
        self.inner
            .registry
            .slots()
            .iter()
            .zip(&ledger.slots)
            .map(|(info, ctx)| SlotSnapshot {
                index: info.index(),
                fifo: info.fifo(),
                state: ledger.table.state(info.index()).unwrap_or(SlotState::Idle),
                fill_len: ctx.fill_len,
                frame_len: ctx.object.as_ref().map(TxObject::payload_len),
            })
            .collect()
    }

    /// Explicit enable/disable request from the upstream transport.
    pub fn manage_queue(&self, target: FlowState) -> FlowState {
        let mut ledger = self.inner.ledger.lock();
        self.inner.request_flow(&mut ledger, target);
        ledger.flow.state()
    }

    /// Return every completed slot to idle and wake the transport.
    ///
    /// A no-op unless every slot is completed.
    pub fn restart(&self) -> bool {
        let mut ledger = self.inner.ledger.lock();
        if !ledger.table.recycle_completed() {
            return false;
        }
        for ctx in &mut ledger.slots {
            ctx.object = None;
            ctx.failed = false;
            ctx.abandoned = false;
        }
        debug!(slots = ledger.table.len(), "transmit slots recycled");
        self.inner.request_flow(&mut ledger, FlowState::Restarting);
        true
    }

    /// Sample the in-flight set, then read the interrupt registers.
    pub fn read_status(&self) -> Result<InterruptStatus> {
        let in_flight = self.inner.ledger.lock().table.mask(SlotState::InFlight);
        InterruptStatus::read(&self.inner.bus, in_flight)
    }

    /// One interrupt pass: events, then aborts, then restart.
    ///
    /// Failed slots that left the controller without a matching event are
    /// released with the events.
    pub fn service_interrupts(&self) -> Result<ServiceReport> {
        let mut status = self.read_status()?;
        let completed = self.handle_tef(&status)?;
        self.release_stranded(&status)?;
        let aborted = self.handle_abort(&mut status)?;
        let restarted = self.restart();
        Ok(ServiceReport {
            completed,
            aborted,
            restarted,
        })
    }

    /// Tear down the device context.
    ///
    /// Waits up to `timeout` for slots in transit to drain, then releases
    /// whatever is left with [`TxOutcome::Aborted`] and stops the transport.
    /// Bus callbacks still queued after this are ignored.
    pub fn detach(self, timeout: Duration) -> DetachReport {
        let deadline = Instant::now() + timeout;
        let drained = loop {
            if !self.inner.ledger.lock().table.any_in_transit() {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            thread::sleep(DETACH_POLL);
        };

        let mut released = Vec::new();
        {
            let mut ledger = self.inner.ledger.lock();
            for slot in 0..ledger.table.len() {
                let Some(state) = ledger.table.state(slot) else {
                    continue;
                };
                if !state.is_in_transit() {
                    continue;
                }
                if let Err(err) = ledger.table.move_slot(slot, state, SlotState::Completed) {
                    error!(%err, "forced release failed");
                    continue;
                }
                let ctx = &mut ledger.slots[slot];
                ctx.generation += 1;
                ctx.object = None;
                self.inner.stats.record_aborted();
                if let Some(handle) = ctx.handle.take() {
                    released.push(handle);
                }
                warn!(slot, ?state, "slot forcibly released at detach");
            }
            self.inner.request_flow(&mut ledger, FlowState::Stopped);
        }

        let aborted = released.len();
        for handle in released {
            self.inner
                .transport
                .on_frame_complete(handle, TxOutcome::Aborted);
        }
        info!(drained, aborted, "transmit pipeline detached");
        DetachReport { drained, aborted }
    }
}

impl<B: SpiBus + 'static, T: TxTransport> Inner<B, T> {
    /// Drive the flow state machine and forward any resulting signal.
    ///
    /// Runs under the ownership lock.
    pub(crate) fn request_flow(&self, ledger: &mut Ledger<T::Handle>, target: FlowState) {
        if let Some(signal) = ledger.flow.request(target) {
            self.transport.set_flow_state(signal);
        }
    }

    /// Count one tracking-drift occurrence.
    pub(crate) fn note_drift(&self, reason: &'static str) {
        let alarm = self.drift.lock().record(Instant::now(), reason);
        self.stats.record_drift(alarm);
    }

    /// Callback that posts a [`TransferDone`] back to this context.
    pub(crate) fn completion(self: &Arc<Self>, slot: usize, generation: u64, phase: Phase) -> Completion {
        let context: Weak<Self> = Arc::downgrade(self);
        Box::new(move |result| {
            if let Some(inner) = context.upgrade() {
                inner.on_transfer_done(TransferDone {
                    slot,
                    generation,
                    phase,
                    result,
                });
            }
        })
    }

    /// Move `slot` to completed and collect what the transport must hear.
    ///
    /// In-flight is the expected source. A slot whose submission failed is
    /// reported as failed whatever `outcome` the controller gave. Filling or
    /// triggering slots are still released, with a warning, so a confused
    /// device cannot wedge the pipeline. Nothing is released from idle or
    /// completed.
    pub(crate) fn release(
        &self,
        ledger: &mut Ledger<T::Handle>,
        slot: usize,
        outcome: TxOutcome,
    ) -> Option<(T::Handle, TxOutcome)> {
        match ledger.table.state(slot) {
            Some(SlotState::InFlight) => {
                if let Err(err) = ledger.table.apply(SlotEvent::Released(slot)) {
                    error!(%err, "release failed");
                    return None;
                }
            }
            Some(state @ (SlotState::Filling | SlotState::Triggering)) => {
                warn!(slot, ?state, "controller reported a slot that is not in flight");
                self.stats.record_mismatch();
                self.note_drift("release of slot not in flight");
                if let Err(err) = ledger.table.move_slot(slot, state, SlotState::Completed) {
                    error!(%err, "release failed");
                    return None;
                }
                ledger.slots[slot].generation += 1;
            }
            state => {
                warn!(slot, ?state, "controller reported a slot with nothing to release");
                self.stats.record_mismatch();
                self.note_drift("release of idle slot");
                return None;
            }
        }

        let ctx = &mut ledger.slots[slot];
        let outcome = if ctx.failed { TxOutcome::Failed } else { outcome };
        let frame_len = ctx.object.take().map_or(0, |object| object.payload_len());
        match outcome {
            TxOutcome::Sent { .. } => self.stats.record_sent(frame_len),
            TxOutcome::Aborted => self.stats.record_aborted(),
            TxOutcome::Failed => self.stats.record_error(),
        }
        debug!(slot, ?outcome, "slot released");
        ctx.handle.take().map(|handle| (handle, outcome))
    }

    pub(crate) fn notify(&self, done: Option<(T::Handle, TxOutcome)>) {
        if let Some((handle, outcome)) = done {
            self.transport.on_frame_complete(handle, outcome);
        }
    }
}
