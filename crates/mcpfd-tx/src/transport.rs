use std::sync::Arc;

use crate::flow::FlowSignal;

/// How a submitted frame left its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Transmitted; carries the event-record timestamp if the ring has one.
    Sent { timestamp: Option<u32> },
    /// Aborted by the controller.
    Aborted,
    /// A bus transfer for the slot failed after it was accepted.
    Failed,
}

impl TxOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TxOutcome::Sent { .. })
    }
}

/// The upstream network layer a pipeline reports to.
///
/// Both methods may be called from the submitting thread, a bus completion
/// context or the interrupt context. `set_flow_state` runs while the
/// pipeline's ownership lock is held and must not call back into the
/// pipeline.
pub trait TxTransport: Send + Sync + 'static {
    /// Upstream handle of a submitted frame, returned on completion.
    type Handle: Send + 'static;

    /// The frame behind `handle` left its slot.
    fn on_frame_complete(&self, handle: Self::Handle, outcome: TxOutcome);

    /// Start or stop the upstream queue.
    fn set_flow_state(&self, signal: FlowSignal);
}

impl<T: TxTransport> TxTransport for Arc<T> {
    type Handle = T::Handle;

    fn on_frame_complete(&self, handle: Self::Handle, outcome: TxOutcome) {
        (**self).on_frame_complete(handle, outcome)
    }

    fn set_flow_state(&self, signal: FlowSignal) {
        (**self).set_flow_state(signal)
    }
}
