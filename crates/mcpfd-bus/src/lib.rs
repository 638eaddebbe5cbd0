//! SPI control-bus abstraction for MCP25xxFD-class CAN controllers.
//!
//! Every register or device-RAM access on these controllers is a bus
//! transaction: a 2-byte command header followed by data. This is the
//! lowest layer of mcpfd; everything else talks to the device through the
//! [`SpiBus`] trait provided here.
//!
//! [`SimController`] implements the trait against an in-memory model of the
//! controller so the upper layers can be exercised on a host.

pub mod command;
pub mod error;
pub mod regs;
pub mod sim;
pub mod traits;

pub use command::{Instruction, COMMAND_LEN};
pub use error::{BusError, Result};
pub use sim::{BusCounters, SimConfig, SimController};
pub use traits::{Completion, SpiBus, Transfer};
