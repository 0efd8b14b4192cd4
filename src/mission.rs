//! # PNR demo mission
//!
//! Arms the vehicle, takes off, flies a fixed route and comes back, while a [PnrEstimator] watches the battery in
//! the background. The estimator switches the vehicle to RTL by itself when the point of no return is reached; from
//! then on the driver stops sending waypoints. If the route completes without that happening, the driver commands
//! RTL at the end.
//!
//! Every leg waits the full [MissionConfig::route_time], also after the point of no return was reached, so that the
//! return flight can be observed for as long as the full route would have taken.
//!
//! ``` no_run
//! # use std::sync::Arc;
//! # async fn fly() -> pnr::Result<()> {
//! let vehicle = pnr::Vehicle::connect("127.0.0.1:14550").await?;
//! let report = pnr::mission::MissionDriver::new(Arc::new(vehicle), Default::default())
//!     .run()
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::control::VehicleControl;
use crate::geo::{LocationGlobal, LocationGlobalRelative};
use crate::pnr::{PnrEstimator, PnrParams};
use crate::scheduler::BackgroundScheduler;
use crate::session::FlightSession;
use crate::subsystems::commander::FlightMode;
use crate::{Error, Result};

/// Where a leg goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waypoint {
    /// A fixed position
    Fixed(LocationGlobalRelative),
    /// Back above the launch location, at `alt` meters
    Launch {
        /// Altitude above home (meters)
        alt: f32,
    },
}

/// One leg of the route
#[derive(Debug, Clone, PartialEq)]
pub struct MissionLeg {
    /// Name used in logs
    pub name: String,
    /// Destination
    pub target: Waypoint,
    /// Ground speed to fly the leg at (m/s), `None` keeps the current one
    pub groundspeed: Option<f32>,
}

impl MissionLeg {
    /// Leg to a fixed position
    pub fn to(name: &str, target: LocationGlobalRelative, groundspeed: Option<f32>) -> Self {
        Self {
            name: name.to_owned(),
            target: Waypoint::Fixed(target),
            groundspeed,
        }
    }

    /// Leg back above the launch location
    pub fn to_launch(name: &str, alt: f32, groundspeed: Option<f32>) -> Self {
        Self {
            name: name.to_owned(),
            target: Waypoint::Launch { alt },
            groundspeed,
        }
    }

    fn resolve(&self, launch: LocationGlobal) -> LocationGlobalRelative {
        match self.target {
            Waypoint::Fixed(location) => location,
            Waypoint::Launch { alt } => LocationGlobalRelative::new(launch.lat, launch.lon, alt),
        }
    }
}

/// Mission configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MissionConfig {
    /// Takeoff altitude (meters above home)
    pub target_altitude: f32,
    /// Fraction of the takeoff altitude considered as reached
    pub altitude_ratio: f32,
    /// Air speed set after takeoff (m/s)
    pub airspeed: f32,
    /// Period of the PNR estimation
    pub sample_interval: Duration,
    /// Period of the armable, armed and altitude polls
    pub poll_interval: Duration,
    /// Time spent on each leg
    pub route_time: Duration,
    /// Bound on each of the armable, armed and altitude polls, `None` waits forever
    pub ready_timeout: Option<Duration>,
    /// The route
    pub legs: Vec<MissionLeg>,
    /// PNR estimation constants
    pub pnr: PnrParams,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            target_altitude: 10.0,
            altitude_ratio: 0.95,
            airspeed: 3.0,
            sample_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            route_time: Duration::from_secs(240),
            ready_timeout: Some(Duration::from_secs(300)),
            legs: vec![
                MissionLeg::to(
                    "first point",
                    LocationGlobalRelative::new(35.567081, -97.599866, 20.0),
                    Some(30.0),
                ),
                MissionLeg::to(
                    "second point",
                    LocationGlobalRelative::new(45.570819, -97.578888, 20.0),
                    Some(20.0),
                ),
                MissionLeg::to_launch("launch point", 20.0, Some(30.0)),
            ],
            pnr: PnrParams::default(),
        }
    }
}

impl MissionConfig {
    /// Check that the values can be flown
    pub fn validate(&self) -> Result<()> {
        if !(self.target_altitude > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "target altitude must be positive, got {}",
                self.target_altitude
            )));
        }
        if !(self.altitude_ratio > 0.0 && self.altitude_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "altitude ratio must be in ]0, 1], got {}",
                self.altitude_ratio
            )));
        }
        if self.sample_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("intervals must be greater than zero".to_owned()));
        }
        if !(self.pnr.return_speed > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "return speed must be positive, got {}",
                self.pnr.return_speed
            )));
        }
        Ok(())
    }
}

/// Phase of the mission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionState {
    /// Nothing done yet
    Uninitialized,
    /// Waiting for the vehicle to become armable
    PreArmCheck,
    /// Guided mode and arming requested
    Arming,
    /// PNR estimation running, waiting for the motors to arm
    TimerStarted,
    /// Climbing to the takeoff altitude
    TakingOff,
    /// Flying leg n (starting at 1)
    Airborne(usize),
    /// Estimation stopped and vehicle released
    Closed,
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionState::Airborne(leg) => write!(f, "Airborne(leg {})", leg),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Outcome of a completed mission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionReport {
    /// The estimator found the point of no return and commanded RTL
    pub pnr_reached: bool,
    /// The route completed without reaching the point of no return, RTL was commanded at the end
    pub forced_rtl: bool,
    /// Number of legs for which a waypoint was sent
    pub legs_flown: usize,
    /// Number of estimator ticks
    pub samples: u64,
}

impl fmt::Display for MissionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} legs flown, {} PNR samples, {}",
            self.legs_flown,
            self.samples,
            if self.pnr_reached {
                "returned at the point of no return"
            } else if self.forced_rtl {
                "returned at the end of the route"
            } else {
                "no return commanded"
            }
        )
    }
}

/// # Mission driver
///
/// Runs the mission once, see the [module documentation](crate::mission).
pub struct MissionDriver {
    vehicle: Arc<dyn VehicleControl>,
    session: Arc<FlightSession>,
    config: MissionConfig,
    scheduler: BackgroundScheduler,
    state: MissionState,
}

impl MissionDriver {
    /// Driver for `vehicle` with a new [FlightSession]
    pub fn new(vehicle: Arc<dyn VehicleControl>, config: MissionConfig) -> Self {
        Self {
            vehicle,
            session: Arc::new(FlightSession::new()),
            config,
            scheduler: BackgroundScheduler::new(),
            state: MissionState::Uninitialized,
        }
    }

    /// Session shared with the estimator
    pub fn session(&self) -> Arc<FlightSession> {
        self.session.clone()
    }

    /// Current phase
    pub fn state(&self) -> MissionState {
        self.state
    }

    /// Fly the mission.
    ///
    /// Whatever happens, the estimation is stopped and the vehicle closed before returning.
    pub async fn run(mut self) -> Result<MissionReport> {
        let result = self.fly().await;

        if let Err(e) = &result {
            log::error!("Mission aborted in state {}: {}", self.state, e);
        }
        if let Err(e) = self.scheduler.shutdown(false).await {
            log::warn!("Cannot stop PNR calculation: {}", e);
        }
        log::info!("Close vehicle object");
        self.vehicle.close().await;
        self.transition(MissionState::Closed);

        let report = result?;
        log::info!("Mission complete: {}", report);
        Ok(report)
    }

    async fn fly(&mut self) -> Result<MissionReport> {
        self.config.validate()?;

        self.arm_and_takeoff().await?;

        log::info!("Set default/target airspeed to {}", self.config.airspeed);
        self.vehicle.set_airspeed(self.config.airspeed).await?;

        let launch = self
            .session
            .launch_location()
            .ok_or(Error::TelemetryUnavailable("launch location"))?;

        let mut legs_flown = 0;
        let legs = self.config.legs.clone();
        for (i, leg) in legs.iter().enumerate() {
            self.transition(MissionState::Airborne(i + 1));
            if self.session.pnr_reached() {
                log::info!("PNR reached, not going towards {}", leg.name);
            } else {
                log::info!(
                    "Going towards {} for {} seconds{} ...",
                    leg.name,
                    self.config.route_time.as_secs(),
                    leg.groundspeed
                        .map(|s| format!(" (groundspeed set to {} m/s)", s))
                        .unwrap_or_default()
                );
                self.vehicle.simple_goto(leg.resolve(launch), leg.groundspeed).await?;
                legs_flown += 1;
            }
            tokio::time::sleep(self.config.route_time).await;
        }

        let pnr_reached = self.session.pnr_reached();
        if !pnr_reached {
            log::info!("Returning to Launch");
            self.vehicle.set_mode(FlightMode::Rtl).await?;
        }

        Ok(MissionReport {
            pnr_reached,
            forced_rtl: !pnr_reached,
            legs_flown,
            samples: self.session.sample_count(),
        })
    }

    async fn arm_and_takeoff(&mut self) -> Result<()> {
        self.transition(MissionState::PreArmCheck);
        log::info!("Basic pre-arm checks");
        let vehicle = self.vehicle.clone();
        self.poll_until("vehicle to become armable", || {
            let armable = vehicle.is_armable();
            if !armable {
                log::info!(" Waiting for vehicle to initialise...");
            }
            armable
        })
        .await?;

        let launch = LocationGlobal::from(self.vehicle.location()?);
        self.session.set_launch_location(launch);
        log::info!("Launch location {}", launch);

        self.transition(MissionState::Arming);
        log::info!("Arming motors");
        self.vehicle.set_mode(FlightMode::Guided).await?;
        self.vehicle.arm().await?;

        // Monitoring is live before the motors are confirmed armed
        log::info!("Starting PNR calculation");
        let estimator = PnrEstimator::new(
            self.vehicle.clone(),
            self.session.clone(),
            self.config.pnr,
            self.config.sample_interval,
        );
        self.scheduler.add_job(estimator, self.config.sample_interval)?;
        self.transition(MissionState::TimerStarted);

        self.poll_until("motors to arm", || {
            let armed = vehicle.is_armed();
            if !armed {
                log::info!(" Waiting for arming...");
            }
            armed
        })
        .await?;

        self.transition(MissionState::TakingOff);
        log::info!("Taking off!");
        self.vehicle.simple_takeoff(self.config.target_altitude).await?;

        let reached = self.config.target_altitude * self.config.altitude_ratio;
        self.poll_until("takeoff altitude", || match vehicle.location() {
            Ok(location) => {
                log::info!(" Altitude: {:.2}", location.alt);
                location.alt >= reached
            }
            Err(e) => {
                log::info!(" Altitude: {}", e);
                false
            }
        })
        .await?;
        log::info!("Reached target altitude");
        Ok(())
    }

    /// Check `ready` every poll interval until it returns true, bounded by the readiness timeout
    async fn poll_until(&self, what: &'static str, mut ready: impl FnMut() -> bool) -> Result<()> {
        let poll_interval = self.config.poll_interval;
        let poll = async move {
            while !ready() {
                tokio::time::sleep(poll_interval).await;
            }
        };
        bounded(what, self.config.ready_timeout, poll).await
    }

    fn transition(&mut self, to: MissionState) {
        log::debug!("Mission state {} -> {}", self.state, to);
        self.state = to;
    }
}

async fn bounded(what: &'static str, timeout: Option<Duration>, poll: impl Future<Output = ()>) -> Result<()> {
    match timeout {
        Some(after) => tokio::time::timeout(after, poll)
            .await
            .map_err(|_| Error::ReadinessTimeout { what, after }),
        None => {
            poll.await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route() {
        let config = MissionConfig::default();
        assert_eq!(config.legs.len(), 3);
        assert_eq!(config.legs[0].groundspeed, Some(30.0));
        assert_eq!(config.legs[1].groundspeed, Some(20.0));
        assert_eq!(config.legs[2].target, Waypoint::Launch { alt: 20.0 });
        assert_eq!(config.route_time, Duration::from_secs(240));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn launch_leg_resolves_to_launch_location() {
        let leg = MissionLeg::to_launch("home", 20.0, None);
        let target = leg.resolve(LocationGlobal::new(-35.36, 149.16));
        assert_eq!(target, LocationGlobalRelative::new(-35.36, 149.16, 20.0));

        let fixed = LocationGlobalRelative::new(1.0, 2.0, 3.0);
        assert_eq!(MissionLeg::to("there", fixed, None).resolve(LocationGlobal::new(0.0, 0.0)), fixed);
    }

    #[test]
    fn rejects_unflyable_config() {
        let bad = [
            MissionConfig {
                target_altitude: 0.0,
                ..Default::default()
            },
            MissionConfig {
                altitude_ratio: 1.5,
                ..Default::default()
            },
            MissionConfig {
                poll_interval: Duration::ZERO,
                ..Default::default()
            },
            MissionConfig {
                pnr: PnrParams {
                    return_speed: 0.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_poll_times_out() {
        let result = bounded(
            "nothing",
            Some(Duration::from_secs(5)),
            std::future::pending::<()>(),
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::ReadinessTimeout {
                what: "nothing",
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_poll_waits_for_completion() {
        let poll = tokio::time::sleep(Duration::from_secs(3600));
        assert!(bounded("an hour", None, poll).await.is_ok());
    }

    #[test]
    fn report_summary() {
        let report = MissionReport {
            pnr_reached: true,
            forced_rtl: false,
            legs_flown: 1,
            samples: 21,
        };
        assert_eq!(
            report.to_string(),
            "1 legs flown, 21 PNR samples, returned at the point of no return"
        );
    }
}
