//! The vehicle interface used by the PNR estimator and the mission driver
//!
//! [Vehicle](crate::Vehicle) implements it over MAVLink. Tests and simulations can implement it directly.

use async_trait::async_trait;

use crate::geo::LocationGlobalRelative;
use crate::subsystems::commander::FlightMode;
use crate::Result;

/// Control and telemetry of one vehicle
#[async_trait]
pub trait VehicleControl: Send + Sync {
    /// Vehicle ready to be armed
    fn is_armable(&self) -> bool;

    /// Motors armed
    fn is_armed(&self) -> bool;

    /// Remaining battery in percent (0-100)
    fn battery_level(&self) -> Result<f64>;

    /// Current position, altitude relative to home
    fn location(&self) -> Result<LocationGlobalRelative>;

    /// Current ground speed in meters/second
    fn groundspeed(&self) -> Result<f32>;

    /// Change flight mode
    async fn set_mode(&self, mode: FlightMode) -> Result<()>;

    /// Request the motors to arm. Returns once the request is sent, see [VehicleControl::is_armed()].
    async fn arm(&self) -> Result<()>;

    /// Take off to `altitude` meters above home
    async fn simple_takeoff(&self, altitude: f32) -> Result<()>;

    /// Fly to `target`, optionally changing the ground speed first
    async fn simple_goto(&self, target: LocationGlobalRelative, groundspeed: Option<f32>) -> Result<()>;

    /// Set the target air speed in meters/second
    async fn set_airspeed(&self, speed: f32) -> Result<()>;

    /// Release the vehicle
    async fn close(&self);
}
