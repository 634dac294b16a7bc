use log::info;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use sqlite::OpenFlags;

use crate::disruption::{DisruptionLogEntry, DisruptionSet};
use crate::graph::Graph;
use crate::network::StationIdx;
use crate::passenger::{Passenger, PassengerId, PassengerKind, TripOutcome};
use crate::primitives::Time;
use crate::timetable::TimetableEntry;
use crate::train::Direction;

#[derive(FromPrimitive)]
enum DBOutcome {
    Planned = 0,
    Completed = 1,
    Cancelled = 2,
    Diverted = 3,
}

#[derive(FromPrimitive)]
enum DBKind {
    Worker = 0,
    Student = 1,
    Tourist = 2,
    Occasional = 3,
}

fn db_outcome(outcome: TripOutcome) -> i64 {
    let outcome = match outcome {
        TripOutcome::Planned => DBOutcome::Planned,
        TripOutcome::Completed { .. } => DBOutcome::Completed,
        TripOutcome::Cancelled => DBOutcome::Cancelled,
        TripOutcome::Diverted => DBOutcome::Diverted,
    };
    outcome as i64
}

fn db_kind(kind: PassengerKind) -> i64 {
    let kind = match kind {
        PassengerKind::Worker => DBKind::Worker,
        PassengerKind::Student => DBKind::Student,
        PassengerKind::Tourist => DBKind::Tourist,
        PassengerKind::Occasional => DBKind::Occasional,
    };
    kind as i64
}

/// Writes the trips of every passenger, the real timetable and the disruption logs of one run.
pub fn export_results<'a>(
    graph: &Graph,
    passengers: impl Iterator<Item = &'a Passenger>,
    timetable: &[TimetableEntry],
    disruptions: &DisruptionSet,
    out_filename: &str,
) -> Result<(), sqlite::Error> {
    info!("Exporting results to {}...", out_filename);
    let connection = sqlite::Connection::open_with_flags(
        out_filename,
        OpenFlags::default()
            .with_create()
            .with_no_mutex()
            .with_read_write(),
    )?;
    connection.execute("BEGIN TRANSACTION;")?;

    connection.execute(
        "CREATE TABLE station (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL
        );
        CREATE TABLE line (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL
        );",
    )?;
    let mut stmt = connection.prepare("INSERT INTO station (id, code, name) VALUES (?, ?, ?)")?;
    for station in graph.stations() {
        let station = graph.station(station);
        stmt.bind((1, station.id.0 as i64))?;
        stmt.bind((2, station.code.as_str()))?;
        stmt.bind((3, station.name.as_str()))?;
        stmt.next()?;
        stmt.reset()?;
    }
    let mut stmt = connection.prepare("INSERT INTO line (id, code, name) VALUES (?, ?, ?)")?;
    for line in graph.lines() {
        stmt.bind((1, line.id.0 as i64))?;
        stmt.bind((2, line.code.as_str()))?;
        stmt.bind((3, line.name.as_str()))?;
        stmt.next()?;
        stmt.reset()?;
    }

    connection.execute(
        "CREATE TABLE trip (
            passenger_id INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            trip_index INTEGER NOT NULL,
            origin INTEGER NOT NULL,
            destination INTEGER NOT NULL,
            departure INTEGER NOT NULL,
            arrival INTEGER,
            outcome INTEGER NOT NULL,
            num_stations INTEGER NOT NULL,
            PRIMARY KEY (passenger_id, trip_index)
        );",
    )?;
    let mut stmt = connection.prepare(
        "INSERT INTO trip (passenger_id, kind, trip_index, origin, destination, departure, \
        arrival, outcome, num_stations) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    let mut num_trips = 0;
    for passenger in passengers {
        for (idx, trip) in passenger.trips().iter().enumerate() {
            stmt.bind((1, passenger.id.0 as i64))?;
            stmt.bind((2, db_kind(passenger.kind)))?;
            stmt.bind((3, idx as i64))?;
            stmt.bind((4, trip.origin().0 as i64))?;
            stmt.bind((5, trip.destination().0 as i64))?;
            stmt.bind((6, trip.departure()))?;
            stmt.bind((7, trip.arrival()))?;
            stmt.bind((8, db_outcome(trip.outcome())))?;
            stmt.bind((9, trip.path().len() as i64))?;
            stmt.next()?;
            stmt.reset()?;
            num_trips += 1;
        }
    }

    connection.execute(
        "CREATE TABLE timetable (
            line INTEGER NOT NULL,
            train INTEGER NOT NULL,
            direction INTEGER NOT NULL,
            trip_number INTEGER NOT NULL,
            station INTEGER NOT NULL,
            arrival INTEGER NOT NULL,
            departure INTEGER NOT NULL,
            next_station INTEGER NOT NULL,
            next_arrival INTEGER NOT NULL,
            next_departure INTEGER NOT NULL
        );",
    )?;
    let mut stmt = connection.prepare(
        "INSERT INTO timetable (line, train, direction, trip_number, station, arrival, departure, \
        next_station, next_arrival, next_departure) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for entry in timetable {
        stmt.bind((1, entry.line.0 as i64))?;
        stmt.bind((2, entry.train.0 as i64))?;
        stmt.bind((
            3,
            match entry.direction {
                Direction::Up => 0,
                Direction::Down => 1,
            },
        ))?;
        stmt.bind((4, entry.trip_number as i64))?;
        stmt.bind((5, entry.station.0 as i64))?;
        stmt.bind((6, entry.arrival))?;
        stmt.bind((7, entry.departure))?;
        stmt.bind((8, entry.next_station.0 as i64))?;
        stmt.bind((9, entry.next_arrival))?;
        stmt.bind((10, entry.next_departure))?;
        stmt.next()?;
        stmt.reset()?;
    }

    connection.execute(
        "CREATE TABLE disruption_log (
            time INTEGER NOT NULL,
            change TEXT NOT NULL,
            kind TEXT NOT NULL,
            start INTEGER NOT NULL,
            end INTEGER,
            event TEXT NOT NULL
        );",
    )?;
    let mut stmt = connection.prepare(
        "INSERT INTO disruption_log (time, change, kind, start, end, event) \
        VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    let logs = [
        ("activated", disruptions.activated()),
        ("deactivated", disruptions.deactivated()),
    ];
    for (change, entries) in logs {
        for DisruptionLogEntry { time, event } in entries {
            stmt.bind((1, *time))?;
            stmt.bind((2, change))?;
            stmt.bind((3, event.kind_name()))?;
            stmt.bind((4, event.start()))?;
            stmt.bind((5, event.end()))?;
            stmt.bind((6, format!("{:?}", event).as_str()))?;
            stmt.next()?;
            stmt.reset()?;
        }
    }

    connection.execute("COMMIT;")?;
    info!(
        "Exported {} trips, {} timetable entries",
        num_trips,
        timetable.len()
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRecord {
    pub passenger: PassengerId,
    pub kind: PassengerKind,
    pub trip_index: usize,
    pub origin: StationIdx,
    pub destination: StationIdx,
    pub departure: Time,
    pub outcome: TripOutcome,
}

#[derive(Debug)]
pub enum ImportError {
    CouldNotOpen(sqlite::Error),
    Sqlite(sqlite::Error),
    InvalidOutcome { passenger: u32, outcome: i64 },
    InvalidKind { passenger: u32, kind: i64 },
    MissingArrival { passenger: u32 },
}

pub fn import_trip_records(in_fname: &str) -> Result<Vec<TripRecord>, ImportError> {
    info!("Importing trips from {}...", in_fname);
    let connection =
        sqlite::Connection::open_with_flags(in_fname, OpenFlags::default().with_read_only())
            .map_err(ImportError::CouldNotOpen)?;

    let records = connection
        .prepare(
            "SELECT passenger_id, kind, trip_index, origin, destination, departure, arrival, \
            outcome FROM trip ORDER BY passenger_id, trip_index ASC;",
        )
        .map_err(ImportError::Sqlite)?
        .iter()
        .map(|it| match it {
            Err(it) => Err(ImportError::Sqlite(it)),
            Ok(it) => {
                let passenger = it.read::<i64, _>(0) as u32;
                let kind: i64 = it.read(1);
                let kind = match DBKind::from_i64(kind) {
                    Some(DBKind::Worker) => PassengerKind::Worker,
                    Some(DBKind::Student) => PassengerKind::Student,
                    Some(DBKind::Tourist) => PassengerKind::Tourist,
                    Some(DBKind::Occasional) => PassengerKind::Occasional,
                    None => return Err(ImportError::InvalidKind { passenger, kind }),
                };
                let arrival: Option<i64> = it.read(6);
                let outcome: i64 = it.read(7);
                let outcome = match DBOutcome::from_i64(outcome) {
                    Some(DBOutcome::Planned) => TripOutcome::Planned,
                    Some(DBOutcome::Completed) => TripOutcome::Completed {
                        arrival: arrival.ok_or(ImportError::MissingArrival { passenger })?,
                    },
                    Some(DBOutcome::Cancelled) => TripOutcome::Cancelled,
                    Some(DBOutcome::Diverted) => TripOutcome::Diverted,
                    None => return Err(ImportError::InvalidOutcome { passenger, outcome }),
                };
                Ok(TripRecord {
                    passenger: PassengerId(passenger),
                    kind,
                    trip_index: it.read::<i64, _>(2) as usize,
                    origin: StationIdx(it.read::<i64, _>(3) as u32),
                    destination: StationIdx(it.read::<i64, _>(4) as u32),
                    departure: it.read::<i64, _>(5),
                    outcome,
                })
            }
        })
        .collect::<Result<_, _>>()?;
    Ok(records)
}

/// Counts per outcome. Diverted trips are counted through the detour that replaced them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TripSummary {
    pub trips: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub diverted: usize,
    pub unfinished: usize,
    /// Mean seconds from departure to arrival over the completed trips.
    pub mean_travel_time: Option<f64>,
}

impl TripSummary {
    pub fn from_records(records: &[TripRecord]) -> Self {
        let mut summary = TripSummary {
            trips: records.len(),
            ..Default::default()
        };
        let mut total_travel_time = 0;
        for record in records {
            match record.outcome {
                TripOutcome::Completed { arrival } => {
                    summary.completed += 1;
                    total_travel_time += arrival - record.departure;
                }
                TripOutcome::Cancelled => summary.cancelled += 1,
                TripOutcome::Diverted => summary.diverted += 1,
                TripOutcome::Planned => summary.unfinished += 1,
            }
        }
        if summary.completed > 0 {
            summary.mean_travel_time = Some(total_travel_time as f64 / summary.completed as f64);
        }
        summary
    }

    pub fn log(&self) {
        info!("Trips: {}", self.trips);
        info!("Completed: {}", self.completed);
        info!("Cancelled: {}", self.cancelled);
        info!("Diverted: {}", self.diverted);
        info!("Unfinished: {}", self.unfinished);
        if let Some(mean) = self.mean_travel_time {
            info!("Mean travel time: {:.1}s", mean);
        }
    }
}
