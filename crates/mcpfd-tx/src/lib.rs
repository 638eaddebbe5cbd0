//! Interrupt-driven multi-slot transmit pipeline for MCP25xxFD controllers.
//!
//! Frames handed down by an upstream transport are placed in free hardware
//! transmit FIFOs ("slots") with two queued bus writes: the message object,
//! then the request bit. Interrupt processing reads the transmit-event ring
//! and the abort flags to find finished slots and reports each frame back
//! to the transport. While every slot is busy the transport is stopped;
//! once all slots have completed they are recycled and it is started again.
//!
//! ```text
//!   submit ──► Idle ─► Filling ─► Triggering ─► InFlight ─► Completed
//!                ▲      (fill cb)   (trigger cb)  (event/abort)   │
//!                └──────────────────── restart ───────────────────┘
//! ```

mod abort;
mod completion;
pub mod config;
pub mod drift;
pub mod error;
pub mod flow;
pub mod ownership;
pub mod pipeline;
pub mod registry;
pub mod stats;
pub mod status;
mod submit;
pub mod transport;

pub use config::TxConfig;
pub use drift::DriftMonitor;
pub use error::{Result, TxError};
pub use flow::{FlowControl, FlowSignal, FlowState};
pub use ownership::{MoveError, Partition, SlotEvent, SlotState, SlotTable};
pub use pipeline::{DetachReport, ServiceReport, SlotSnapshot, TxPipeline};
pub use registry::{SlotInfo, SlotRegistry, TefLayout};
pub use stats::{StatsSnapshot, TxStats};
pub use status::InterruptStatus;
pub use submit::SubmitStatus;
pub use transport::{TxOutcome, TxTransport};
