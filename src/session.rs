//! State shared between the mission driver and the PNR estimator for the length of one flight

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::geo::LocationGlobal;

/// # Flight session
///
/// Created when the mission starts and shared by reference (`Arc`) with the estimator job. The launch location is
/// set once, the PNR flag only ever goes from `false` to `true`.
#[derive(Debug, Default)]
pub struct FlightSession {
    launch_location: OnceLock<LocationGlobal>,
    sample_count: AtomicU64,
    pnr_reached: AtomicBool,
    cumulative_groundspeed: Mutex<f64>,
}

impl FlightSession {
    /// New session, nothing recorded yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the launch location. Returns `false`, and keeps the first one, if it was already set.
    pub fn set_launch_location(&self, location: LocationGlobal) -> bool {
        self.launch_location.set(location).is_ok()
    }

    /// Launch location, once recorded
    pub fn launch_location(&self) -> Option<LocationGlobal> {
        self.launch_location.get().copied()
    }

    /// Count one estimator tick and return the new count
    pub fn next_sample(&self) -> u64 {
        self.sample_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of estimator ticks so far
    pub fn sample_count(&self) -> u64 {
        self.sample_count.load(Ordering::SeqCst)
    }

    /// The point of no return has been reached and return to launch was commanded
    pub fn pnr_reached(&self) -> bool {
        self.pnr_reached.load(Ordering::SeqCst)
    }

    /// Set the PNR flag. Returns `true` only for the call that actually flipped it.
    pub fn try_mark_pnr_reached(&self) -> bool {
        self.pnr_reached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Add a ground speed sample and return the running total
    pub fn add_groundspeed(&self, speed: f64) -> f64 {
        let mut total = self.cumulative_groundspeed.lock().unwrap_or_else(|e| e.into_inner());
        *total += speed;
        *total
    }

    /// Sum of all ground speed samples
    pub fn cumulative_groundspeed(&self) -> f64 {
        *self.cumulative_groundspeed.lock().unwrap_or_else(|e| e.into_inner())
    }
}
