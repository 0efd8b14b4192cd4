// Simulated copter used by the mission tests. Runs on tokio time, so tests can use a paused clock.

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pnr::geo::LocationGlobalRelative;
use pnr::subsystems::commander::FlightMode;
use pnr::{Error, Result, VehicleControl};
use tokio::time::Instant;

pub const HOME: LocationGlobalRelative = LocationGlobalRelative {
    lat: -35.363261,
    lon: 149.165230,
    alt: 0.0,
};

const ARMING_TIME: Duration = Duration::from_secs(2);
const CLIMB_RATE: f32 = 2.0;

#[derive(Debug, Default)]
pub struct SimLog {
    pub modes: Vec<FlightMode>,
    pub gotos: Vec<(LocationGlobalRelative, Option<f32>)>,
    pub airspeed: Option<f32>,
    pub takeoff: Option<f32>,
    pub closed: bool,
}

struct SimState {
    armed_at: Option<Instant>,
    takeoff_at: Option<Instant>,
    log: SimLog,
}

/// A copter hovering over home whose battery drains linearly from 100 %
pub struct SimVehicle {
    start: Instant,
    armable_after: Option<Duration>,
    drain_per_second: f64,
    gps: bool,
    state: Mutex<SimState>,
}

impl SimVehicle {
    pub fn new(drain_per_second: f64) -> Self {
        Self {
            start: Instant::now(),
            armable_after: Some(Duration::ZERO),
            drain_per_second,
            gps: true,
            state: Mutex::new(SimState {
                armed_at: None,
                takeoff_at: None,
                log: SimLog::default(),
            }),
        }
    }

    pub fn never_armable(mut self) -> Self {
        self.armable_after = None;
        self
    }

    pub fn without_gps(mut self) -> Self {
        self.gps = false;
        self
    }

    pub fn with_log<T>(&self, f: impl FnOnce(&SimLog) -> T) -> T {
        f(&self.state.lock().unwrap().log)
    }
}

#[async_trait]
impl VehicleControl for SimVehicle {
    fn is_armable(&self) -> bool {
        self.armable_after
            .map(|after| self.start.elapsed() >= after)
            .unwrap_or(false)
    }

    fn is_armed(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.armed_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    fn battery_level(&self) -> Result<f64> {
        let drained = self.drain_per_second * self.start.elapsed().as_secs_f64();
        Ok((100.0 - drained).max(0.0))
    }

    fn location(&self) -> Result<LocationGlobalRelative> {
        if !self.gps {
            return Err(Error::TelemetryUnavailable("position"));
        }
        let state = self.state.lock().unwrap();
        let alt = match (state.takeoff_at, state.log.takeoff) {
            (Some(at), Some(target)) => (at.elapsed().as_secs_f32() * CLIMB_RATE).min(target),
            _ => 0.0,
        };
        Ok(LocationGlobalRelative { alt, ..HOME })
    }

    fn groundspeed(&self) -> Result<f32> {
        Ok(0.0)
    }

    async fn set_mode(&self, mode: FlightMode) -> Result<()> {
        self.state.lock().unwrap().log.modes.push(mode);
        Ok(())
    }

    async fn arm(&self) -> Result<()> {
        self.state.lock().unwrap().armed_at = Some(Instant::now() + ARMING_TIME);
        Ok(())
    }

    async fn simple_takeoff(&self, altitude: f32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.takeoff_at = Some(Instant::now());
        state.log.takeoff = Some(altitude);
        Ok(())
    }

    async fn simple_goto(&self, target: LocationGlobalRelative, groundspeed: Option<f32>) -> Result<()> {
        self.state.lock().unwrap().log.gotos.push((target, groundspeed));
        Ok(())
    }

    async fn set_airspeed(&self, speed: f32) -> Result<()> {
        self.state.lock().unwrap().log.airspeed = Some(speed);
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().log.closed = true;
    }
}
