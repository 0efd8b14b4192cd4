//! # Vehicle subsystems
//!
//! The autopilot side of the link is organized in two directions: a stream of telemetry coming down, and commands
//! going up and being acknowledged. Each has its own subsystem here, both are available as public fields of the
//! [Vehicle](crate::Vehicle).

pub mod commander;
pub mod telemetry;
