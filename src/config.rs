use crate::col::{map_new, HashMap};
use crate::graph::TravelParams;
use crate::primitives::Time;
use crate::input::reader;

/// Global run parameters, passed explicitly to the graph and the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub start_time: Time,
    pub end_time: Time,
    /// Seconds a train stops at every open station.
    pub dwell_time: Time,
    /// m/s²
    pub acceleration: f64,
    /// m/s
    pub max_speed: f64,
    pub train_capacity: usize,
    pub seed: u64,
    /// Passengers generated for a weekday; other day types are scaled down.
    pub daily_passengers: usize,
    /// Shares of workers, students, tourists and occasional travellers.
    pub kind_proportions: [f64; 4],
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_time: 5 * 3600,
            end_time: 24 * 3600,
            dwell_time: 30,
            acceleration: 1.1,
            max_speed: 80.0 / 3.6,
            train_capacity: 600,
            seed: 0,
            daily_passengers: 0,
            kind_proportions: [0.5, 0.2, 0.1, 0.2],
        }
    }
}

impl SimConfig {
    pub fn travel_params(&self) -> TravelParams {
        TravelParams {
            acceleration: self.acceleration,
            max_speed: self.max_speed,
        }
    }

    /// Name of the first parameter that makes the simulation meaningless.
    pub fn invalid_parameter(&self) -> Option<&'static str> {
        if self.end_time <= self.start_time {
            Some("end_time")
        } else if self.dwell_time <= 0 {
            Some("dwell_time")
        } else if !(self.acceleration > 0.0) {
            Some("acceleration")
        } else if !(self.max_speed > 0.0) {
            Some("max_speed")
        } else if self.train_capacity == 0 {
            Some("train_capacity")
        } else if self.kind_proportions.iter().any(|p| !(*p >= 0.0))
            || self.kind_proportions.iter().sum::<f64>() <= 0.0
        {
            Some("kind_proportions")
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub enum ParseConfigError {
    CsvError(csv::Error),
    InvalidValue(Box<str>),
}

/// Accepts plain seconds or `HH:MM[:SS]`.
pub fn parse_time(value: &str) -> Option<Time> {
    if let Ok(seconds) = value.parse::<Time>() {
        return Some(seconds);
    }
    let parts = value
        .split(':')
        .map(|it| it.parse::<Time>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [h, m] => Some(h * 3600 + m * 60),
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}

/// Reads `key;value` rows. Missing keys keep their default value.
pub fn parse_config(stream: impl std::io::Read) -> Result<SimConfig, ParseConfigError> {
    let key_value_pairs = reader()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_reader(stream)
        .deserialize()
        .collect::<Result<Box<[(String, String)]>, csv::Error>>()
        .map_err(ParseConfigError::CsvError)?;
    let mut values: HashMap<String, String> = map_new();
    values.extend(key_value_pairs.iter().cloned());

    fn invalid(key: &str) -> ParseConfigError {
        ParseConfigError::InvalidValue(format!("Could not parse value of {}!", key).into())
    }
    fn number<T: std::str::FromStr>(
        values: &HashMap<String, String>,
        key: &str,
        default: T,
    ) -> Result<T, ParseConfigError> {
        match values.get(key) {
            Some(value) => value.parse::<T>().map_err(|_| invalid(key)),
            None => Ok(default),
        }
    }
    fn time(
        values: &HashMap<String, String>,
        key: &str,
        default: Time,
    ) -> Result<Time, ParseConfigError> {
        match values.get(key) {
            Some(value) => parse_time(value).ok_or_else(|| invalid(key)),
            None => Ok(default),
        }
    }

    let default = SimConfig::default();
    let [worker, student, tourist, occasional] = default.kind_proportions;
    Ok(SimConfig {
        start_time: time(&values, "start_time", default.start_time)?,
        end_time: time(&values, "end_time", default.end_time)?,
        dwell_time: number(&values, "dwell_time", default.dwell_time)?,
        acceleration: number(&values, "acceleration", default.acceleration)?,
        max_speed: number(&values, "max_speed", default.max_speed)?,
        train_capacity: number(&values, "train_capacity", default.train_capacity)?,
        seed: number(&values, "seed", default.seed)?,
        daily_passengers: number(&values, "daily_passengers", default.daily_passengers)?,
        kind_proportions: [
            number(&values, "share_worker", worker)?,
            number(&values, "share_student", student)?,
            number(&values, "share_tourist", tourist)?,
            number(&values, "share_occasional", occasional)?,
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_times() {
        assert_eq!(parse_time("3600"), Some(3600));
        assert_eq!(parse_time("05:30"), Some(5 * 3600 + 30 * 60));
        assert_eq!(parse_time("23:59:59"), Some(86399));
        assert_eq!(parse_time("noon"), None);
    }

    #[test]
    fn parses_config_with_defaults() {
        let input = "# key; value\nstart_time; 06:00\ndwell_time; 45\nseed; 7\nshare_tourist; 0.3\n";
        let config = parse_config(input.as_bytes()).unwrap();
        assert_eq!(config.start_time, 6 * 3600);
        assert_eq!(config.dwell_time, 45);
        assert_eq!(config.seed, 7);
        assert_eq!(config.kind_proportions[2], 0.3);
        assert_eq!(config.end_time, SimConfig::default().end_time);
        assert_eq!(config.invalid_parameter(), None);
    }

    #[test]
    fn rejects_invalid_values() {
        let input = "dwell_time; soon\n";
        assert!(matches!(
            parse_config(input.as_bytes()),
            Err(ParseConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn detects_invalid_parameters() {
        let config = SimConfig {
            end_time: 0,
            ..SimConfig::default()
        };
        assert_eq!(config.invalid_parameter(), Some("end_time"));
        let config = SimConfig {
            acceleration: 0.0,
            ..SimConfig::default()
        };
        assert_eq!(config.invalid_parameter(), Some("acceleration"));
    }
}
