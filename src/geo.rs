//! # Geographic locations and distances
//!
//! Positions are WGS-84 latitude/longitude in degrees. Distances are computed on the WGS-84 ellipsoid with
//! Vincenty's inverse formula, which is accurate to well under a millimeter for non-antipodal points.

use std::fmt;

/// WGS-84 semi-major axis (meters)
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS-84 semi-minor axis (meters)
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_CONVERGENCE: f64 = 1e-12;

/// Mean earth radius used when Vincenty does not converge (nearly antipodal points)
const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationGlobal {
    /// Latitude (degrees, positive north)
    pub lat: f64,
    /// Longitude (degrees, positive east)
    pub lon: f64,
}

impl LocationGlobal {
    /// Create a location from latitude and longitude in degrees
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Ellipsoidal distance to another location, in meters
    pub fn distance_to(&self, other: &LocationGlobal) -> f64 {
        distance(self, other)
    }
}

impl fmt::Display for LocationGlobal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Location with an altitude relative to the home position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationGlobalRelative {
    /// Latitude (degrees, positive north)
    pub lat: f64,
    /// Longitude (degrees, positive east)
    pub lon: f64,
    /// Altitude above home (meters)
    pub alt: f32,
}

impl LocationGlobalRelative {
    /// Create a location from latitude, longitude (degrees) and relative altitude (meters)
    pub fn new(lat: f64, lon: f64, alt: f32) -> Self {
        Self { lat, lon, alt }
    }
}

impl From<LocationGlobalRelative> for LocationGlobal {
    fn from(location: LocationGlobalRelative) -> Self {
        Self::new(location.lat, location.lon)
    }
}

impl fmt::Display for LocationGlobalRelative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6}, {:.1} m)", self.lat, self.lon, self.alt)
    }
}

/// Distance in meters between two locations on the WGS-84 ellipsoid.
///
/// Uses Vincenty's inverse formula. For the rare nearly antipodal pairs where the iteration does not converge,
/// the great-circle distance on a mean-radius sphere is returned instead.
pub fn distance(a: &LocationGlobal, b: &LocationGlobal) -> f64 {
    vincenty_inverse(a, b).unwrap_or_else(|| great_circle(a, b))
}

fn vincenty_inverse(a: &LocationGlobal, b: &LocationGlobal) -> Option<f64> {
    if a.lat == b.lat && a.lon == b.lon {
        return Some(0.0);
    }

    let u1 = ((1.0 - WGS84_F) * a.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * b.lat.to_radians().tan()).atan();
    let l = (b.lon - a.lon).to_radians();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            // Coincident points
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Both points on the equator: cos²α is 0
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - lambda_prev).abs() < VINCENTY_CONVERGENCE {
            let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                                * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
            return Some(WGS84_B * big_a * (sigma - delta_sigma));
        }
    }

    None
}

fn great_circle(a: &LocationGlobal, b: &LocationGlobal) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let sin_dlat = ((b.lat - a.lat).to_radians() / 2.0).sin();
    let sin_dlon = ((b.lon - a.lon).to_radians() / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * MEAN_EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
