//! # Point of No Return
//!
//! This crate flies a copter on a demo route while watching, in real time, whether it still has the battery to make
//! it back home. When the point of no return is reached the vehicle is switched to Return To Launch.
//!
//! The vehicle is an ArduCopter autopilot (real or SITL) reached over MAVLink on UDP.
//!
//! ## Status
//!
//! | Part | Support |
//! |------|---------|
//! | Link | UDP in/out, MAVLink v1/v2 receive, v2 send |
//! | Telemetry | Heartbeat, GPS fix, battery, position, speeds, status text |
//! | Commander | Mode, arm, takeoff, goto, air/ground speed |
//! | PNR estimator | Full |
//! | Mission | The fixed demo route, configurable |
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Connect a [Vehicle] from a connection string, this waits for the autopilot heartbeat and initializes the
//!    subsystems
//!  - Subsystems are available as public fields of the [Vehicle] struct
//!  - Either drive the vehicle directly through its subsystems, or hand it to a
//!    [MissionDriver](mission::MissionDriver) which runs the PNR mission through the [VehicleControl] trait
//!  - Drop the Vehicle object or call [Vehicle::close()]
//!
//! All vehicle functions only take a shared reference to self (`&self`), the intention is for the Vehicle object to
//! be shared between tasks using `Arc<>`.
//!
//! For example:
//! ``` no_run
//! # use std::sync::Arc;
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! let vehicle = pnr::Vehicle::connect("127.0.0.1:14550").await?;
//!
//! println!("Battery: {:?}", vehicle.telemetry.battery_level());
//! println!("Mode: {:?}", vehicle.telemetry.mode());
//!
//! let report = pnr::mission::MissionDriver::new(Arc::new(vehicle), Default::default())
//!     .run()
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod error;
mod mav_utils;
mod vehicle;

pub mod control;
pub mod geo;
pub mod link;
pub mod mission;
pub mod pnr;
pub mod scheduler;
pub mod session;
pub mod subsystems;

pub use crate::control::VehicleControl;
pub use crate::error::{Error, Result};
pub use crate::vehicle::{Vehicle, CONNECT_TIMEOUT};
