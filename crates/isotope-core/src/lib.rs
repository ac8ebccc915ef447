//! # Isotope Core Library
//!
//! Host-side communication engine for the Isotope Breakout board.
//!
//! This library provides:
//! - The board's line-oriented JSON protocol over serial (or a TCP bridge)
//! - Correlation of replies to commands by sequence number, including
//!   long-running commands that reply twice
//! - Connection handshake with firmware compatibility check, and heartbeat
//! - Drivers for the motor, power output, PWM, ADC and temperature ports
//! - A simulated board for hardware-free testing
//!
//! ## Example
//!
//! ```rust,ignore
//! use isotope_core::prelude::*;
//!
//! let mut board = Isotope::new(ConnectionConfig::new("/dev/ttyACM0"));
//! let firmware = board.connect()?;
//! println!("firmware v{}", firmware);
//!
//! board.powers_mut().get_mut(0)?.enable(Some(512))?;
//! println!("ADC 0: {:?}", board.adcs().get(0)?.value()?);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod board;
pub mod config;
pub mod firmware;
pub mod logging;
pub mod port;
pub mod protocol;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::board::Isotope;
    pub use crate::config::ConnectionConfig;
    pub use crate::firmware::FirmwareVersion;
    pub use crate::port::{
        AdcInputPort, Capability, MotorPort, Port, PortContainer, PowerOutputPort, PwmOutput,
        PwmOutputPort, TempInputPort,
    };
    pub use crate::protocol::{
        Command, CommandKind, Connection, IsotopeError, Reply, ReplyStatus, Result, Section,
    };
    pub use crate::sim::{SimulatedBoard, SimulatedBoardHandle};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
