use std::fs::File;
use std::io;
use std::path::Path;

use itertools::Itertools;
use log::info;
use serde::Deserialize;

use crate::col::{map_new, HashMap};
use crate::config::{parse_config, parse_time, ParseConfigError, SimConfig};
use crate::disruption::{DisruptionEvent, DisruptionSet};
use crate::geometry::Point;
use crate::network::{ExtLine, ExtStation, NetworkDescription, StationIdx};
use crate::primitives::Time;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StationRecord {
    #[serde(rename = "# station_id")]
    pub station_id: usize,
    pub code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LineRecord {
    #[serde(rename = "# line_id")]
    pub line_id: usize,
    pub code: String,
    pub name: String,
    pub train_count: usize,
    /// Empty means the configured train capacity.
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LineStopRecord {
    #[serde(rename = "# line_id")]
    pub line_id: usize,
    pub position: usize,
    pub station_id: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StationClosedRecord {
    #[serde(rename = "# station_id")]
    station_id: usize,
    start: String,
    end: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LineClosedRecord {
    #[serde(rename = "# from_station")]
    from_station: usize,
    to_station: usize,
    start: String,
    end: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LineDelayRecord {
    #[serde(rename = "# from_station")]
    from_station: usize,
    to_station: usize,
    /// Seconds added to the hop.
    delay: Time,
    start: String,
    end: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AttendancePeakRecord {
    #[serde(rename = "# station_id")]
    station_id: usize,
    time: String,
    size: usize,
}

#[derive(Debug)]
pub enum InputError {
    Io(Box<str>, io::Error),
    Csv(Box<str>, csv::Error),
    Config(ParseConfigError),
    DuplicateStationId(usize),
    DuplicateLineId(usize),
    UnknownStationId(usize),
    UnknownLineId(usize),
    InvalidTime(Box<str>),
}

pub(crate) fn reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).delimiter(b';');

    builder
}

fn parse_records<T: serde::de::DeserializeOwned>(
    stream: impl std::io::Read,
) -> Result<Box<[T]>, csv::Error> {
    reader().from_reader(stream).deserialize().collect()
}

pub fn parse_stations(stream: impl std::io::Read) -> Result<Box<[StationRecord]>, csv::Error> {
    parse_records(stream)
}
pub fn parse_lines(stream: impl std::io::Read) -> Result<Box<[LineRecord]>, csv::Error> {
    parse_records(stream)
}
pub fn parse_line_stops(stream: impl std::io::Read) -> Result<Box<[LineStopRecord]>, csv::Error> {
    parse_records(stream)
}

/// Renumbers the external ids densely in file order. Returns the station mapping as well, since
/// the disruption files refer to external station ids.
pub fn build_network(
    stations: &[StationRecord],
    lines: &[LineRecord],
    stops: &[LineStopRecord],
) -> Result<(NetworkDescription, HashMap<usize, StationIdx>), InputError> {
    let mut station_idx: HashMap<usize, StationIdx> = map_new();
    for (idx, station) in stations.iter().enumerate() {
        if station_idx
            .insert(station.station_id, StationIdx(idx as u32))
            .is_some()
        {
            return Err(InputError::DuplicateStationId(station.station_id));
        }
    }

    let mut line_idx: HashMap<usize, usize> = map_new();
    for (idx, line) in lines.iter().enumerate() {
        if line_idx.insert(line.line_id, idx).is_some() {
            return Err(InputError::DuplicateLineId(line.line_id));
        }
    }

    let mut line_stops: Vec<Vec<(usize, StationIdx)>> = vec![Vec::new(); lines.len()];
    for stop in stops {
        let &line = line_idx
            .get(&stop.line_id)
            .ok_or(InputError::UnknownLineId(stop.line_id))?;
        let &station = station_idx
            .get(&stop.station_id)
            .ok_or(InputError::UnknownStationId(stop.station_id))?;
        line_stops[line].push((stop.position, station));
    }

    let description = NetworkDescription {
        stations: stations
            .iter()
            .map(|s| ExtStation {
                code: s.code.clone(),
                name: s.name.clone(),
                position: Point::new(s.latitude, s.longitude),
            })
            .collect(),
        lines: lines
            .iter()
            .zip(line_stops)
            .map(|(line, stops)| ExtLine {
                code: line.code.clone(),
                name: line.name.clone(),
                stations: stops
                    .into_iter()
                    .sorted_by_key(|&(position, _)| position)
                    .map(|(_, station)| station)
                    .collect(),
                train_count: line.train_count,
                capacity: line.capacity,
            })
            .collect(),
    };
    Ok((description, station_idx))
}

struct StationLookup<'a>(&'a HashMap<usize, StationIdx>);

impl StationLookup<'_> {
    fn get(&self, id: usize) -> Result<StationIdx, InputError> {
        self.0
            .get(&id)
            .copied()
            .ok_or(InputError::UnknownStationId(id))
    }
}

fn time(value: &str) -> Result<Time, InputError> {
    parse_time(value).ok_or_else(|| InputError::InvalidTime(value.into()))
}

fn station_closures(
    records: &[StationClosedRecord],
    stations: &StationLookup,
) -> Result<Vec<DisruptionEvent>, InputError> {
    records
        .iter()
        .map(|r| {
            Ok(DisruptionEvent::StationClosed {
                station: stations.get(r.station_id)?,
                start: time(&r.start)?,
                end: time(&r.end)?,
            })
        })
        .collect()
}

fn line_closures(
    records: &[LineClosedRecord],
    stations: &StationLookup,
) -> Result<Vec<DisruptionEvent>, InputError> {
    records
        .iter()
        .map(|r| {
            Ok(DisruptionEvent::LineClosed {
                from: stations.get(r.from_station)?,
                to: stations.get(r.to_station)?,
                start: time(&r.start)?,
                end: time(&r.end)?,
            })
        })
        .collect()
}

fn line_delays(
    records: &[LineDelayRecord],
    stations: &StationLookup,
) -> Result<Vec<DisruptionEvent>, InputError> {
    records
        .iter()
        .map(|r| {
            Ok(DisruptionEvent::LineDelay {
                from: stations.get(r.from_station)?,
                to: stations.get(r.to_station)?,
                delay: r.delay,
                start: time(&r.start)?,
                end: time(&r.end)?,
            })
        })
        .collect()
}

fn attendance_peaks(
    records: &[AttendancePeakRecord],
    stations: &StationLookup,
) -> Result<Vec<DisruptionEvent>, InputError> {
    records
        .iter()
        .map(|r| {
            Ok(DisruptionEvent::AttendancePeak {
                station: stations.get(r.station_id)?,
                time: time(&r.time)?,
                size: r.size,
            })
        })
        .collect()
}

/// Everything a run reads from its input directory.
#[derive(Debug)]
pub struct Input {
    pub config: SimConfig,
    pub network: NetworkDescription,
    pub disruptions: DisruptionSet,
}

fn open(dir: &Path, name: &str) -> Result<File, InputError> {
    let path = dir.join(name);
    File::open(&path).map_err(|err| InputError::Io(path.to_string_lossy().into(), err))
}

/// Opens an optional file; `None` if it does not exist.
fn open_optional(dir: &Path, name: &str) -> Result<Option<File>, InputError> {
    match open(dir, name) {
        Ok(file) => Ok(Some(file)),
        Err(InputError::Io(_, err)) if err.kind() == io::ErrorKind::NotFound => {
            info!("No {} found", name);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn read_optional<T: serde::de::DeserializeOwned>(
    dir: &Path,
    name: &str,
) -> Result<Box<[T]>, InputError> {
    match open_optional(dir, name)? {
        Some(file) => parse_records(file).map_err(|err| InputError::Csv(name.into(), err)),
        None => Ok(Box::new([])),
    }
}

fn csv_error(name: &'static str) -> impl FnOnce(csv::Error) -> InputError {
    move |err| InputError::Csv(name.into(), err)
}

pub fn load_network(
    dir: &Path,
) -> Result<(NetworkDescription, HashMap<usize, StationIdx>), InputError> {
    let stations = parse_stations(open(dir, "Stations.csv")?).map_err(csv_error("Stations.csv"))?;
    let lines = parse_lines(open(dir, "Lines.csv")?).map_err(csv_error("Lines.csv"))?;
    let stops =
        parse_line_stops(open(dir, "LineStops.csv")?).map_err(csv_error("LineStops.csv"))?;
    info!(
        "Read {} stations, {} lines, {} line stops",
        stations.len(),
        lines.len(),
        stops.len()
    );
    build_network(&stations, &lines, &stops)
}

/// Reads the four disruption files. Missing files contribute no events.
pub fn load_disruptions(
    dir: &Path,
    station_idx: &HashMap<usize, StationIdx>,
) -> Result<DisruptionSet, InputError> {
    let stations = StationLookup(station_idx);
    let mut set = DisruptionSet::default();
    let events = [
        station_closures(&read_optional(dir, "StationClosed.csv")?, &stations)?,
        line_closures(&read_optional(dir, "LineClosed.csv")?, &stations)?,
        line_delays(&read_optional(dir, "LineDelay.csv")?, &stations)?,
        attendance_peaks(&read_optional(dir, "AttendancePeak.csv")?, &stations)?,
    ];
    for event in events.into_iter().flatten() {
        set.push(event);
    }
    info!("Read {} disruption events", set.len());
    Ok(set)
}

pub fn load_input(dir: &Path) -> Result<Input, InputError> {
    let config = match open_optional(dir, "Config.csv")? {
        Some(file) => parse_config(file).map_err(InputError::Config)?,
        None => SimConfig::default(),
    };
    let (network, station_idx) = load_network(dir)?;
    let disruptions = load_disruptions(dir, &station_idx)?;
    Ok(Input {
        config,
        network,
        disruptions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATIONS: &str = "\
# station_id; code; name; latitude; longitude
10; CEN; Central; 40.4168; -3.7038
20; NOR; North; 40.4268; -3.7038
30; EAS; East; 40.4168; -3.6938
";
    const LINES: &str = "\
# line_id; code; name; train_count; capacity
1; L1; Line 1; 4; 800
2; L2; Line 2; 2;
";
    const STOPS: &str = "\
# line_id; position; station_id
1; 1; 10
1; 0; 20
2; 0; 10
2; 1; 30
";

    fn network() -> (NetworkDescription, HashMap<usize, StationIdx>) {
        build_network(
            &parse_stations(STATIONS.as_bytes()).unwrap(),
            &parse_lines(LINES.as_bytes()).unwrap(),
            &parse_line_stops(STOPS.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn renumbers_stations_and_orders_stops() {
        let (description, station_idx) = network();
        assert_eq!(description.stations.len(), 3);
        assert_eq!(station_idx[&20], StationIdx(1));
        assert_eq!(description.stations[2].code, "EAS");
        assert_eq!(
            description.lines[0].stations,
            vec![StationIdx(1), StationIdx(0)]
        );
        assert_eq!(description.lines[0].capacity, Some(800));
        assert_eq!(description.lines[1].capacity, None);
        assert_eq!(description.lines[1].train_count, 2);
    }

    #[test]
    fn rejects_unknown_and_duplicate_ids() {
        let stations = parse_stations(STATIONS.as_bytes()).unwrap();
        let lines = parse_lines(LINES.as_bytes()).unwrap();
        let stops = parse_line_stops("# line_id; position; station_id\n1; 0; 99\n".as_bytes())
            .unwrap();
        assert!(matches!(
            build_network(&stations, &lines, &stops),
            Err(InputError::UnknownStationId(99))
        ));

        let stops = parse_line_stops("# line_id; position; station_id\n7; 0; 10\n".as_bytes())
            .unwrap();
        assert!(matches!(
            build_network(&stations, &lines, &stops),
            Err(InputError::UnknownLineId(7))
        ));

        let twice = [stations[0].clone(), stations[0].clone()];
        assert!(matches!(
            build_network(&twice, &[], &[]),
            Err(InputError::DuplicateStationId(10))
        ));
    }

    #[test]
    fn parses_disruption_records() {
        let (_, station_idx) = network();
        let stations = StationLookup(&station_idx);

        let records: Box<[StationClosedRecord]> =
            parse_records("# station_id; start; end\n20; 07:00; 07:30\n".as_bytes()).unwrap();
        assert_eq!(
            station_closures(&records, &stations).unwrap(),
            vec![DisruptionEvent::StationClosed {
                station: StationIdx(1),
                start: 7 * 3600,
                end: 7 * 3600 + 1800,
            }]
        );

        let records: Box<[LineDelayRecord]> = parse_records(
            "# from_station; to_station; delay; start; end\n10; 30; 120; 28800; 09:00\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(
            line_delays(&records, &stations).unwrap(),
            vec![DisruptionEvent::LineDelay {
                from: StationIdx(0),
                to: StationIdx(2),
                delay: 120,
                start: 8 * 3600,
                end: 9 * 3600,
            }]
        );

        let records: Box<[AttendancePeakRecord]> =
            parse_records("# station_id; time; size\n30; later; 10\n".as_bytes()).unwrap();
        assert!(matches!(
            attendance_peaks(&records, &stations),
            Err(InputError::InvalidTime(_))
        ));
    }
}
