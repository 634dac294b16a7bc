use std::sync::{Mutex, PoisonError};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;

use crate::graph::Graph;
use crate::network::{LineIdx, StationIdx, TrainIdx};
use crate::primitives::Time;
use crate::train::{Direction, Train};

/// One stop of one train: when it stood at `station` and when it reaches the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableEntry {
    pub line: LineIdx,
    pub train: TrainIdx,
    pub direction: Direction,
    pub trip_number: u32,
    pub station: StationIdx,
    pub arrival: Time,
    pub departure: Time,
    pub next_station: StationIdx,
    pub next_arrival: Time,
    pub next_departure: Time,
}

impl TimetableEntry {
    /// The entry for a train that just arrived at its current station.
    pub fn at_stop(train: &Train, graph: &Graph, dwell_time: Time) -> Option<Self> {
        let station = train.current_station?;
        let arrival = train.arrival_at_current?;
        let departure = arrival + dwell_time;
        let next_arrival = departure + graph.segment_time(station, train.next_station);
        Some(Self {
            line: train.line,
            train: train.id,
            direction: train.direction,
            trip_number: train.trip_number,
            station,
            arrival,
            departure,
            next_station: train.next_station,
            next_arrival,
            next_departure: next_arrival + dwell_time,
        })
    }

    fn sort_key(&self) -> (Time, TrainIdx) {
        (self.arrival, self.train)
    }
}

/// The stops trains actually made during a run. Trains of one batch record concurrently.
#[derive(Debug, Default)]
pub struct RealTimetable {
    entries: Mutex<Vec<TimetableEntry>>,
}

impl RealTimetable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: TimetableEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// All entries ordered by arrival, then train.
    pub fn entries(&mut self) -> &[TimetableEntry] {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        entries.sort_by_key(TimetableEntry::sort_key);
        entries
    }

    pub fn len(&mut self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

/// The timetable the fleet would run on an undisturbed network until `end_time`.
pub fn pre_timetable(
    graph: &Graph,
    trains: Vec<Train>,
    dwell_time: Time,
    end_time: Time,
) -> Vec<TimetableEntry> {
    let mut entries: Vec<TimetableEntry> = trains
        .into_par_iter()
        .flat_map_iter(|mut train| {
            let line = graph.line(train.line);
            let mut stops = Vec::new();
            while train.next_station_arrival < end_time {
                train.arrive(line);
                let Some(entry) = TimetableEntry::at_stop(&train, graph, dwell_time) else {
                    break;
                };
                train.next_station_arrival = entry.next_arrival;
                stops.push(entry);
            }
            stops
        })
        .collect();
    entries.sort_by_key(TimetableEntry::sort_key);
    entries
}

#[derive(Serialize)]
struct TimetableRow<'a> {
    line: &'a str,
    train: u32,
    direction: &'static str,
    trip: u32,
    station: &'a str,
    arrival: Time,
    departure: Time,
    next_station: &'a str,
    next_arrival: Time,
    next_departure: Time,
}

pub fn write_timetable(
    graph: &Graph,
    entries: &[TimetableEntry],
    stream: impl std::io::Write,
) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(stream);
    for entry in entries {
        writer.serialize(TimetableRow {
            line: &graph.line(entry.line).code,
            train: entry.train.0,
            direction: match entry.direction {
                Direction::Up => "up",
                Direction::Down => "down",
            },
            trip: entry.trip_number,
            station: &graph.station(entry.station).code,
            arrival: entry.arrival,
            departure: entry.departure,
            next_station: &graph.station(entry.next_station).code,
            next_arrival: entry.next_arrival,
            next_departure: entry.next_departure,
        })?;
    }
    writer.flush()?;
    Ok(())
}
