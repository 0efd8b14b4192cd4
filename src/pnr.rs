//! # Point of No Return estimation
//!
//! The point of no return is the last moment the vehicle can still make it back to its launch location with the
//! battery it has left. The estimate is deliberately simple:
//!
//!  - the battery drain rate is the average since takeoff: `(100 - level) / time_in_flight`
//!  - the remaining flight time is `level / drain_rate`
//!  - the time to fly home is the distance to the launch location at a fixed return speed
//!
//! Once the difference between the two, the margin, drops under a threshold the vehicle is switched to RTL. This
//! happens at most once per [FlightSession].
//!
//! [PnrEstimator] runs the estimation as a [PeriodicJob] on telemetry read from a [VehicleControl].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::control::VehicleControl;
use crate::geo::{self, LocationGlobal};
use crate::scheduler::PeriodicJob;
use crate::session::FlightSession;
use crate::subsystems::commander::FlightMode;

/// Constants of the estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnrParams {
    /// Assumed ground speed when returning home (m/s)
    pub return_speed: f64,
    /// Return as soon as the margin is under this many seconds
    pub margin_threshold: f64,
    /// Battery reserve in percent. Only shown in the trace, it is not taken into account by the estimation.
    pub battery_reserve: f64,
}

impl Default for PnrParams {
    fn default() -> Self {
        Self {
            return_speed: 5.0,
            margin_threshold: 60.0,
            battery_reserve: 5.0,
        }
    }
}

/// Average battery drain in percent per second.
///
/// A drain of exactly zero, as on the ground before the battery level moves, is replaced by 1 %/s so that the
/// remaining flight time stays finite. This is a coarse safety floor, not a model of the battery.
pub fn battery_drop_rate(battery_level: f64, time_in_flight: f64) -> f64 {
    let rate = (100.0 - battery_level) / time_in_flight;
    if rate == 0.0 {
        1.0
    } else {
        rate
    }
}

/// Result of one estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimationSample {
    /// Seconds since the estimation started
    pub time_in_flight: f64,
    /// Percent per second
    pub battery_drop_rate: f64,
    /// Meters to the launch location
    pub distance_to_home: f64,
    /// Seconds of flight left at the current drain rate
    pub remaining_flight_time: f64,
    /// Seconds needed to fly back home
    pub return_home_time: f64,
    /// `remaining_flight_time - return_home_time`
    pub margin: f64,
    margin_threshold: f64,
}

impl EstimationSample {
    /// Estimate from the battery level (percent), the tick count, the tick interval (seconds) and the distance to
    /// the launch location (meters).
    ///
    /// Returns `None` when no flight time has elapsed yet (`sample_count` or `interval_s` zero).
    pub fn compute(
        battery_level: f64,
        sample_count: u64,
        interval_s: f64,
        distance_to_home: f64,
        params: &PnrParams,
    ) -> Option<Self> {
        let time_in_flight = sample_count as f64 * interval_s;
        if time_in_flight <= 0.0 || !time_in_flight.is_finite() {
            return None;
        }

        let battery_drop_rate = battery_drop_rate(battery_level, time_in_flight);
        let remaining_flight_time = battery_level / battery_drop_rate;
        let return_home_time = distance_to_home / params.return_speed;

        Some(Self {
            time_in_flight,
            battery_drop_rate,
            distance_to_home,
            remaining_flight_time,
            return_home_time,
            margin: remaining_flight_time - return_home_time,
            margin_threshold: params.margin_threshold,
        })
    }

    /// The margin is under the threshold, time to go home
    pub fn should_return(&self) -> bool {
        self.margin < self.margin_threshold
    }
}

/// # PNR estimator job
///
/// Each tick counts one sample in the session, reads the battery level and position from the vehicle and runs
/// [EstimationSample::compute()]. The tick is skipped, with a warning, if any of the inputs is not available. The
/// first tick finding the margin under the threshold sets the session PNR flag and switches the vehicle to RTL.
pub struct PnrEstimator {
    vehicle: Arc<dyn VehicleControl>,
    session: Arc<FlightSession>,
    params: PnrParams,
    interval: Duration,
}

impl PnrEstimator {
    /// Estimator for `vehicle`, meant to be ticked every `interval`
    pub fn new(
        vehicle: Arc<dyn VehicleControl>,
        session: Arc<FlightSession>,
        params: PnrParams,
        interval: Duration,
    ) -> Self {
        Self {
            vehicle,
            session,
            params,
            interval,
        }
    }

    /// Run one estimation. Returns the sample if one could be computed.
    pub async fn estimate(&self) -> Option<EstimationSample> {
        let sample_count = self.session.next_sample();

        let battery = match self.vehicle.battery_level() {
            Ok(level) => level,
            Err(e) => {
                log::warn!("PNR #{} skipped: {}", sample_count, e);
                return None;
            }
        };
        let position = match self.vehicle.location() {
            Ok(position) => LocationGlobal::from(position),
            Err(e) => {
                log::warn!("PNR #{} skipped: {}", sample_count, e);
                return None;
            }
        };
        let Some(home) = self.session.launch_location() else {
            log::warn!("PNR #{} skipped: launch location not recorded", sample_count);
            return None;
        };

        if let Ok(speed) = self.vehicle.groundspeed() {
            let total = self.session.add_groundspeed(speed as f64);
            log::debug!("  Mean groundspeed {:.2} m/s", total / sample_count as f64);
        }

        let distance = geo::distance(&home, &position);
        let Some(sample) = EstimationSample::compute(
            battery,
            sample_count,
            self.interval.as_secs_f64(),
            distance,
            &self.params,
        ) else {
            log::warn!("PNR #{} skipped: no time in flight", sample_count);
            return None;
        };

        log::info!("----- PNR={}", self.session.pnr_reached());
        log::info!("  Calculating PNR #{}", sample_count);
        log::info!("  Time in flight {:.4}", sample.time_in_flight);
        log::info!("  Current battery {:.3}", battery - self.params.battery_reserve);
        log::info!("  Battery usage is {:.4}", sample.battery_drop_rate);
        log::info!("  Distance to home {:.4}", sample.distance_to_home);
        log::info!("  Remaining flight time {:.4}", sample.remaining_flight_time);
        log::info!("  Return home time {:.4}", sample.return_home_time);
        log::info!("  Flight time before PNR {:.4}", sample.margin);

        if sample.should_return() && self.session.try_mark_pnr_reached() {
            log::warn!("PNR - Returning to Launch");
            if let Err(e) = self.vehicle.set_mode(FlightMode::Rtl).await {
                log::error!("Cannot switch to RTL: {}", e);
            }
        }

        Some(sample)
    }
}

#[async_trait]
impl PeriodicJob for PnrEstimator {
    async fn tick(&self) {
        self.estimate().await;
    }

    fn name(&self) -> &str {
        "PNR estimator"
    }
}
