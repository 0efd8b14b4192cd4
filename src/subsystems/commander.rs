//! # Command subsystem
//!
//! This subsystem sends commands to the autopilot: flight mode changes, arming, takeoff, speed changes and
//! position targets. It targets ArduCopter, flight modes are the ArduCopter custom modes.
//!
//! Commands are fire-and-forget from the point of view of the caller. After each `COMMAND_LONG` the commander
//! waits up to [COMMAND_ACK_TIMEOUT] for the matching `COMMAND_ACK` and logs it. A missing or negative ack is
//! logged and not reported as an error, the caller is expected to observe the effect of the command through
//! [telemetry](crate::subsystems::telemetry) (for example by polling the armed state after [Commander::arm()]).
//!
//! ``` no_run
//! # use pnr::subsystems::commander::FlightMode;
//! # async fn takeoff(vehicle: pnr::Vehicle) -> pnr::Result<()> {
//! vehicle.commander.set_mode(FlightMode::Guided).await?;
//! vehicle.commander.arm().await?;
//! vehicle.commander.takeoff(10.0).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use flume::{Receiver, Sender};
use futures::lock::Mutex;
use mavlink::common::{
    MavCmd, MavFrame, MavMessage, MavResult, PositionTargetTypemask, COMMAND_ACK_DATA, COMMAND_LONG_DATA,
    SET_POSITION_TARGET_GLOBAL_INT_DATA,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::geo::LocationGlobalRelative;
use crate::mav_utils::wait_command_ack;
use crate::Result;

/// How long to wait for the acknowledgement of a command
pub const COMMAND_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// ArduCopter flight modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum FlightMode {
    /// Manual, self-levelling
    Stabilize = 0,
    /// Manual, rate control
    Acro = 1,
    /// Manual with altitude hold
    AltHold = 2,
    /// Onboard mission
    Auto = 3,
    /// Follows position targets from the ground station
    Guided = 4,
    /// Position hold
    Loiter = 5,
    /// Return to launch
    Rtl = 6,
    /// Circle around a point
    Circle = 7,
    /// Land in place
    Land = 9,
    /// Manual, coordinated turns
    Drift = 11,
    /// Rate control with altitude hold
    Sport = 13,
    /// Flip on the roll or pitch axis
    Flip = 14,
    /// Automatic PID tuning
    AutoTune = 15,
    /// Position hold with direct stick response
    PosHold = 16,
    /// Stop as fast as possible
    Brake = 17,
    /// Start the motors after a throw
    Throw = 18,
    /// ADS-B collision avoidance
    AvoidAdsb = 19,
    /// Attitude targets from the ground station, no GPS
    GuidedNoGps = 20,
    /// Return to launch along the flown path
    SmartRtl = 21,
    /// Position hold with optical flow
    FlowHold = 22,
    /// Follow another vehicle
    Follow = 23,
    /// Back and forth between two points
    ZigZag = 24,
    /// System identification
    SystemId = 25,
    /// Helicopter autorotation
    Autorotate = 26,
    /// Return after an onboard mission
    AutoRtl = 27,
    /// Turn the vehicle upright
    Turtle = 28,
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Acro => "ACRO",
            FlightMode::AltHold => "ALT_HOLD",
            FlightMode::Auto => "AUTO",
            FlightMode::Guided => "GUIDED",
            FlightMode::Loiter => "LOITER",
            FlightMode::Rtl => "RTL",
            FlightMode::Circle => "CIRCLE",
            FlightMode::Land => "LAND",
            FlightMode::Drift => "DRIFT",
            FlightMode::Sport => "SPORT",
            FlightMode::Flip => "FLIP",
            FlightMode::AutoTune => "AUTOTUNE",
            FlightMode::PosHold => "POSHOLD",
            FlightMode::Brake => "BRAKE",
            FlightMode::Throw => "THROW",
            FlightMode::AvoidAdsb => "AVOID_ADSB",
            FlightMode::GuidedNoGps => "GUIDED_NOGPS",
            FlightMode::SmartRtl => "SMART_RTL",
            FlightMode::FlowHold => "FLOWHOLD",
            FlightMode::Follow => "FOLLOW",
            FlightMode::ZigZag => "ZIGZAG",
            FlightMode::SystemId => "SYSTEMID",
            FlightMode::Autorotate => "AUTOROTATE",
            FlightMode::AutoRtl => "AUTO_RTL",
            FlightMode::Turtle => "TURTLE",
        };
        f.write_str(name)
    }
}

// DO_SET_MODE param1: custom mode enabled
const MODE_FLAG_CUSTOM: f32 = 1.0;

// DO_CHANGE_SPEED param1
const SPEED_TYPE_AIRSPEED: f32 = 0.0;
const SPEED_TYPE_GROUNDSPEED: f32 = 1.0;
const THROTTLE_NO_CHANGE: f32 = -1.0;

/// # Command subsystem
///
/// This struct implements methods to command the vehicle.
/// See the [commander module documentation](crate::subsystems::commander) for more context and information.
#[derive(Debug)]
pub struct Commander {
    uplink: Sender<MavMessage>,
    acks: Mutex<Receiver<COMMAND_ACK_DATA>>,
    target_system: u8,
    target_component: u8,
}

impl Commander {
    pub(crate) fn new(
        uplink: Sender<MavMessage>,
        acks: Receiver<COMMAND_ACK_DATA>,
        (target_system, target_component): (u8, u8),
    ) -> Self {
        Self {
            uplink,
            acks: Mutex::new(acks),
            target_system,
            target_component,
        }
    }

    /// Switch the autopilot to a flight mode
    pub async fn set_mode(&self, mode: FlightMode) -> Result<()> {
        log::info!("Setting flight mode {}", mode);
        let custom_mode: u32 = mode.into();
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [MODE_FLAG_CUSTOM, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Arm the motors.
    ///
    /// The autopilot refuses to arm if its pre-arm checks fail, poll the armed state to know when it is done.
    pub async fn arm(&self) -> Result<()> {
        log::info!("Arming motors");
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Take off to `altitude` meters above home. The vehicle must be armed and in guided mode.
    pub async fn takeoff(&self, altitude: f32) -> Result<()> {
        log::info!("Taking off to {:.1} m", altitude);
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude],
        )
        .await
    }

    /// Set the target air speed in meters/second
    pub async fn set_airspeed(&self, speed: f32) -> Result<()> {
        log::debug!("Setting airspeed {:.1} m/s", speed);
        self.command_long(
            MavCmd::MAV_CMD_DO_CHANGE_SPEED,
            [SPEED_TYPE_AIRSPEED, speed, THROTTLE_NO_CHANGE, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Set the target ground speed in meters/second
    pub async fn set_groundspeed(&self, speed: f32) -> Result<()> {
        log::debug!("Setting groundspeed {:.1} m/s", speed);
        self.command_long(
            MavCmd::MAV_CMD_DO_CHANGE_SPEED,
            [SPEED_TYPE_GROUNDSPEED, speed, THROTTLE_NO_CHANGE, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Fly to a position, altitude relative to home. Only followed in guided mode.
    ///
    /// There is no acknowledgement for position targets, the function returns as soon as the target is queued.
    pub async fn goto(&self, target: LocationGlobalRelative) -> Result<()> {
        log::info!("Going to {}", target);
        #[allow(deprecated)]
        let msg = MavMessage::SET_POSITION_TARGET_GLOBAL_INT(SET_POSITION_TARGET_GLOBAL_INT_DATA {
            time_boot_ms: 0,
            target_system: self.target_system,
            target_component: self.target_component,
            coordinate_frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            type_mask: position_only(),
            lat_int: (target.lat * 1e7).round() as i32,
            lon_int: (target.lon * 1e7).round() as i32,
            alt: target.alt,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
        });
        self.uplink.send_async(msg).await?;
        Ok(())
    }

    async fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        // One command in flight at a time so acks are not mixed up
        let acks = self.acks.lock().await;
        while acks.try_recv().is_ok() {}

        let [param1, param2, param3, param4, param5, param6, param7] = params;
        let msg = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.target_system,
            target_component: self.target_component,
            command,
            confirmation: 0,
            param1,
            param2,
            param3,
            param4,
            param5,
            param6,
            param7,
        });
        self.uplink.send_async(msg).await?;

        match wait_command_ack(&acks, command, COMMAND_ACK_TIMEOUT).await? {
            Some(ack) if ack.result == MavResult::MAV_RESULT_ACCEPTED => {
                log::debug!("{:?} accepted", command);
            }
            Some(ack) => log::warn!("{:?} not accepted: {:?}", command, ack.result),
            None => log::warn!("No acknowledgement for {:?}", command),
        }
        Ok(())
    }
}

fn position_only() -> PositionTargetTypemask {
    PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VY_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE
}
