//! Transmit path for MCP25xxFD-class SPI CAN-FD controllers.
//!
//! # Crate Structure
//!
//! - [`bus`] - SPI control-bus abstraction and the simulated controller
//! - [`frame`] - CAN / CAN-FD frames and the controller's object layouts
//! - [`tx`] - The interrupt-driven multi-slot transmit pipeline

/// Re-export bus types.
pub mod bus {
    pub use mcpfd_bus::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mcpfd_frame::*;
}

/// Re-export transmit pipeline types.
pub mod tx {
    pub use mcpfd_tx::*;
}
