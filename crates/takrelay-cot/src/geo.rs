//! Great-circle distance and bearing between two coordinates

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters and initial bearing in degrees, normalized to [0, 360).
///
/// Identical points yield `(0.0, 0.0)`.
pub fn distance_and_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();
    let mut bearing = y.atan2(x).to_degrees();
    if bearing < 0.0 {
        bearing += 360.0;
    }
    // -0.0 and rounding just under 360 both belong at 0
    if bearing >= 360.0 || bearing == 0.0 {
        bearing = 0.0;
    }

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    (EARTH_RADIUS_M * c, bearing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_points() {
        assert_eq!(distance_and_bearing(0.0, 0.0, 0.0, 0.0), (0.0, 0.0));

        let (dist, bearing) = distance_and_bearing(59.93, 30.31, 59.93, 30.31);
        assert_eq!(dist, 0.0);
        assert_eq!(bearing, 0.0);
    }

    #[test]
    fn test_quarter_equator() {
        let (dist, bearing) = distance_and_bearing(0.0, 0.0, 0.0, 90.0);
        assert!((dist - 10_007_543.0).abs() < 1.0, "distance was {}", dist);
        assert!((bearing - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_cardinal_bearings() {
        let (_, north) = distance_and_bearing(0.0, 0.0, 1.0, 0.0);
        let (_, south) = distance_and_bearing(1.0, 0.0, 0.0, 0.0);
        let (_, west) = distance_and_bearing(0.0, 0.0, 0.0, -1.0);
        assert!(north.abs() < 1e-9);
        assert!((south - 180.0).abs() < 1e-9);
        assert!((west - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_degree_latitude() {
        let (dist, _) = distance_and_bearing(10.0, 20.0, 11.0, 20.0);
        assert!((dist - 111_194.9).abs() < 1.0, "distance was {}", dist);
    }

    #[test]
    fn test_antipodal_points() {
        let (dist, bearing) = distance_and_bearing(0.0, 0.0, 0.0, 180.0);
        assert!((dist - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
        assert!((0.0..360.0).contains(&bearing));
    }
}
