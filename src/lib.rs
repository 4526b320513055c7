//! Motorized gate controller.
//!
//! The core (state machine, command source, I/O snapshot, reporter and MQTT
//! bridge) is hardware agnostic and builds on the host. The `firmware`
//! feature adds the ESP32 board glue in [`board`].
#![cfg_attr(not(test), no_std)]

pub mod bridge;
pub mod fsm;
pub mod gpi;
pub mod io;
pub mod report;
pub mod types;

#[cfg(feature = "firmware")]
pub mod board;

pub use fsm::GateController;
pub use types::{GateConfig, GateState};
