//! # Telemetry subsystem
//!
//! The autopilot streams its state as a set of periodic MAVLink messages. This subsystem listens to all of them
//! and keeps the latest decoded value of everything the lib cares about:
//!  - Heartbeat: armed flag, flight mode and system status
//!  - GPS fix type
//!  - Battery remaining (percent)
//!  - Global position and altitude relative to home
//!  - Air and ground speed
//!
//! Autopilot status texts are forwarded to the log as they arrive.
//!
//! Values are timestamped when received. Battery and position readings older than [TELEMETRY_MAX_AGE] are
//! considered unavailable, as is any value that was never received.
//!
//! ``` no_run
//! # async fn status(vehicle: &pnr::Vehicle) -> pnr::Result<()> {
//! let battery = vehicle.telemetry.battery_level()?;
//! let position = vehicle.telemetry.location()?;
//! println!("Battery {:.0}% at {}", battery, position);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flume::Receiver;
use mavlink::common::{GpsFixType, MavAutopilot, MavMessage, MavModeFlag, MavSeverity, MavState, MavType};
use mavlink::MavHeader;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::geo::LocationGlobalRelative;
use crate::subsystems::commander::FlightMode;
use crate::{Error, Result};

/// Maximum age of a battery or position reading before it is considered stale
pub const TELEMETRY_MAX_AGE: Duration = Duration::from_secs(5);

const HEARTBEAT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
struct Stamped<T> {
    value: T,
    at: Instant,
}

impl<T: Copy> Stamped<T> {
    fn fresh(&self, now: Instant) -> Option<T> {
        (now.saturating_duration_since(self.at) <= TELEMETRY_MAX_AGE).then_some(self.value)
    }
}

/// Latest known state of the vehicle
#[derive(Debug, Clone, Default)]
pub struct VehicleState {
    vehicle_id: Option<(u8, u8)>,
    armed: bool,
    mode: Option<FlightMode>,
    custom_mode: Option<u32>,
    system_status: Option<MavState>,
    gps_fix: Option<GpsFixType>,
    battery: Option<Stamped<f64>>,
    location: Option<Stamped<LocationGlobalRelative>>,
    airspeed: Option<Stamped<f32>>,
    groundspeed: Option<Stamped<f32>>,
}

impl VehicleState {
    /// System and component id of the autopilot, known after its first heartbeat
    pub fn vehicle_id(&self) -> Option<(u8, u8)> {
        self.vehicle_id
    }

    /// Motors armed, as reported by the last heartbeat
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Current flight mode, `None` before the first heartbeat or for modes this lib does not know
    pub fn mode(&self) -> Option<FlightMode> {
        self.mode
    }

    /// Raw custom mode number from the last heartbeat
    pub fn custom_mode(&self) -> Option<u32> {
        self.custom_mode
    }

    /// Whether the autopilot reports it is ready to be armed.
    ///
    /// The vehicle must have sent a heartbeat, be past its boot and calibration phase and have at least a 2D GPS
    /// fix. The current flight mode does not matter.
    pub fn is_armable(&self) -> bool {
        let initialised = !matches!(
            self.system_status,
            None | Some(MavState::MAV_STATE_UNINIT)
                | Some(MavState::MAV_STATE_BOOT)
                | Some(MavState::MAV_STATE_CALIBRATING)
        );
        let gps_ok = !matches!(
            self.gps_fix,
            None | Some(GpsFixType::GPS_FIX_TYPE_NO_GPS) | Some(GpsFixType::GPS_FIX_TYPE_NO_FIX)
        );
        self.custom_mode.is_some() && initialised && gps_ok
    }

    fn battery_level(&self, now: Instant) -> Result<f64> {
        self.battery
            .and_then(|b| b.fresh(now))
            .ok_or(Error::TelemetryUnavailable("battery level"))
    }

    fn location(&self, now: Instant) -> Result<LocationGlobalRelative> {
        self.location
            .and_then(|l| l.fresh(now))
            .ok_or(Error::TelemetryUnavailable("position"))
    }

    fn groundspeed(&self, now: Instant) -> Result<f32> {
        self.groundspeed
            .and_then(|s| s.fresh(now))
            .ok_or(Error::TelemetryUnavailable("groundspeed"))
    }

    fn airspeed(&self, now: Instant) -> Result<f32> {
        self.airspeed
            .and_then(|s| s.fresh(now))
            .ok_or(Error::TelemetryUnavailable("airspeed"))
    }

    /// Update the state from one received message
    pub(crate) fn apply(&mut self, header: &MavHeader, msg: &MavMessage, now: Instant) {
        match (self.vehicle_id, msg) {
            (None, MavMessage::HEARTBEAT(hb)) => {
                if hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID || hb.mavtype == MavType::MAV_TYPE_GCS {
                    return;
                }
                log::debug!(
                    "Autopilot heartbeat from system {} component {}",
                    header.system_id,
                    header.component_id
                );
                self.vehicle_id = Some((header.system_id, header.component_id));
            }
            (None, _) => return,
            (Some((system_id, _)), _) if system_id != header.system_id => return,
            (Some((_, component_id)), MavMessage::HEARTBEAT(_)) if component_id != header.component_id => return,
            _ => (),
        }

        match msg {
            MavMessage::HEARTBEAT(hb) => {
                if hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID || hb.mavtype == MavType::MAV_TYPE_GCS {
                    return;
                }
                let armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                if armed != self.armed {
                    log::debug!("Vehicle {}", if armed { "armed" } else { "disarmed" });
                }
                self.armed = armed;
                self.custom_mode = Some(hb.custom_mode);
                self.mode = FlightMode::try_from(hb.custom_mode).ok();
                self.system_status = Some(hb.system_status);
            }
            MavMessage::GPS_RAW_INT(gps) => {
                self.gps_fix = Some(gps.fix_type);
            }
            MavMessage::SYS_STATUS(status) => {
                // -1 means the autopilot does not estimate the remaining capacity
                if status.battery_remaining >= 0 {
                    self.battery = Some(Stamped {
                        value: status.battery_remaining as f64,
                        at: now,
                    });
                }
            }
            MavMessage::GLOBAL_POSITION_INT(pos) => {
                self.location = Some(Stamped {
                    value: LocationGlobalRelative::new(
                        pos.lat as f64 / 1e7,
                        pos.lon as f64 / 1e7,
                        pos.relative_alt as f32 / 1000.0,
                    ),
                    at: now,
                });
            }
            MavMessage::VFR_HUD(hud) => {
                self.airspeed = Some(Stamped {
                    value: hud.airspeed,
                    at: now,
                });
                self.groundspeed = Some(Stamped {
                    value: hud.groundspeed,
                    at: now,
                });
            }
            MavMessage::STATUSTEXT(status) => {
                let text: String = status
                    .text
                    .iter()
                    .take_while(|&&c| c != 0)
                    .map(|&c| c as char)
                    .collect();
                match status.severity {
                    MavSeverity::MAV_SEVERITY_EMERGENCY
                    | MavSeverity::MAV_SEVERITY_ALERT
                    | MavSeverity::MAV_SEVERITY_CRITICAL
                    | MavSeverity::MAV_SEVERITY_ERROR => log::error!("Autopilot: {}", text),
                    MavSeverity::MAV_SEVERITY_WARNING => log::warn!("Autopilot: {}", text),
                    _ => log::info!("Autopilot: {}", text),
                }
            }
            MavMessage::COMMAND_ACK(ack) => {
                log::debug!("Command {:?}: {:?}", ack.command, ack.result);
            }
            _ => (),
        }
    }
}

/// # Access to the telemetry subsystem
///
/// See the [telemetry module documentation](crate::subsystems::telemetry) for more context and information.
#[derive(Debug)]
pub struct Telemetry {
    state: Arc<Mutex<VehicleState>>,
    _telemetry_task: JoinHandle<()>,
}

impl Telemetry {
    pub(crate) fn new(downlink: Receiver<(MavHeader, MavMessage)>) -> Self {
        let state: Arc<Mutex<VehicleState>> = Default::default();

        let task_state = state.clone();
        let _telemetry_task = tokio::spawn(async move {
            while let Ok((header, msg)) = downlink.recv_async().await {
                lock(&task_state).apply(&header, &msg, Instant::now());
            }
        });

        Self {
            state,
            _telemetry_task,
        }
    }

    /// Snapshot of the current vehicle state
    pub fn state(&self) -> VehicleState {
        lock(&self.state).clone()
    }

    /// Wait for the first autopilot heartbeat and return the autopilot system and component id
    pub async fn wait_heartbeat(&self, timeout: Duration) -> Result<(u8, u8)> {
        let wait = async {
            loop {
                if let Some(id) = lock(&self.state).vehicle_id {
                    return id;
                }
                tokio::time::sleep(HEARTBEAT_POLL).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Connection(format!("no heartbeat from vehicle within {:?}", timeout)))
    }

    /// See [VehicleState::is_armable]
    pub fn is_armable(&self) -> bool {
        lock(&self.state).is_armable()
    }

    /// Motors armed
    pub fn is_armed(&self) -> bool {
        lock(&self.state).armed
    }

    /// Current flight mode, if known
    pub fn mode(&self) -> Option<FlightMode> {
        lock(&self.state).mode
    }

    /// Remaining battery capacity in percent (0-100)
    pub fn battery_level(&self) -> Result<f64> {
        lock(&self.state).battery_level(Instant::now())
    }

    /// Position with altitude relative to home
    pub fn location(&self) -> Result<LocationGlobalRelative> {
        lock(&self.state).location(Instant::now())
    }

    /// Ground speed in meters/second
    pub fn groundspeed(&self) -> Result<f32> {
        lock(&self.state).groundspeed(Instant::now())
    }

    /// Air speed in meters/second
    pub fn airspeed(&self) -> Result<f32> {
        lock(&self.state).airspeed(Instant::now())
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self._telemetry_task.abort();
    }
}

fn lock(state: &Mutex<VehicleState>) -> MutexGuard<'_, VehicleState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
