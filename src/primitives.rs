/// Simulated time and durations, in seconds.
pub type Time = i64;

/// Distances in meters.
pub type Meters = f64;
