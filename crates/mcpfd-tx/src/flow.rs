//! Start/stop signalling towards the upstream transport.

use serde::Serialize;
use tracing::{debug, error};

/// Queue flow-control state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Nothing queued yet, transport not started.
    #[default]
    Runnable,
    /// Transport may submit frames.
    Started,
    /// Transport told to pause.
    Stopped,
    /// Transitional target used by restart.
    Restarting,
}

/// Signal delivered to the upstream transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowSignal {
    Start,
    Stop,
}

/// Flow-control state machine.
#[derive(Debug, Default)]
pub struct FlowControl {
    state: FlowState,
}

impl FlowControl {
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Request a transition to `target`.
    ///
    /// Returns the signal the transport must receive, if any. A restart
    /// request lands in `Started` once the transport has been woken.
    pub fn request(&mut self, target: FlowState) -> Option<FlowSignal> {
        use FlowState::*;

        match (self.state, target) {
            (Runnable | Stopped, Started | Restarting) => {
                debug!(from = ?self.state, to = ?target, "waking transmit queue");
                self.state = Started;
                Some(FlowSignal::Start)
            }
            (Started, Runnable | Stopped) => {
                debug!(to = ?target, "stopping transmit queue");
                self.state = target;
                Some(FlowSignal::Stop)
            }
            (Restarting, _) => {
                error!(requested = ?target, "flow control stuck in restarting state");
                None
            }
            _ => None,
        }
    }
}
