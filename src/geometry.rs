use crate::primitives::{Meters, Time};

const EARTH_RADIUS: Meters = 6_371_000.0;

/// 6 km/h in meters per second.
pub const WALKING_SPEED: f64 = 6000.0 / 3600.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Great-circle distance between two points.
pub fn distance(p1: Point, p2: Point) -> Meters {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS * c
}

/// Time needed to cover `distance` starting and ending at rest.
///
/// Trains accelerate with `acceleration` (m/s²) up to `max_speed` (m/s), cruise, and brake
/// symmetrically. If the distance is too short to ever reach `max_speed`, the speed profile is
/// a triangle: accelerate over the first half, brake over the second.
pub fn travel_time(distance: Meters, acceleration: f64, max_speed: f64) -> Time {
    let acceleration_distance = max_speed * max_speed / (2.0 * acceleration);
    let seconds = if distance > 2.0 * acceleration_distance {
        let acceleration_time = max_speed / acceleration;
        let cruise_time = (distance - 2.0 * acceleration_distance) / max_speed;
        2.0 * acceleration_time + cruise_time
    } else {
        2.0 * (2.0 * (distance / 2.0) / acceleration).sqrt()
    };
    seconds.round() as Time
}

pub fn walking_time(distance: Meters) -> Time {
    (distance / WALKING_SPEED).round() as Time
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_of_one_degree_latitude() {
        let d = distance(Point::new(48.0, 2.0), Point::new(49.0, 2.0));
        assert!((d - 111_195.0).abs() < 50.0, "got {}", d);
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_same_point() {
        let a = Point::new(48.8566, 2.3522);
        let b = Point::new(48.8738, 2.2950);
        assert_eq!(distance(a, a), 0.0);
        assert!((distance(a, b) - distance(b, a)).abs() < 1e-9);
    }

    #[test]
    fn long_distance_uses_cruise_phase() {
        // 1 m/s² up to 20 m/s: 200 m to accelerate, 200 m to brake.
        // 1000 m = 20 s + 20 s + 600 m / 20 m/s.
        assert_eq!(travel_time(1000.0, 1.0, 20.0), 70);
    }

    #[test]
    fn short_distance_is_triangular() {
        // 100 m: 50 m accelerating takes 10 s, braking another 10 s.
        assert_eq!(travel_time(100.0, 1.0, 20.0), 20);
    }

    #[test]
    fn profile_is_continuous_at_the_threshold() {
        assert_eq!(travel_time(400.0, 1.0, 20.0), 40);
        assert_eq!(travel_time(400.1, 1.0, 20.0), 40);
    }

    #[test]
    fn walking_one_kilometer() {
        assert_eq!(walking_time(1000.0), 600);
    }
}
