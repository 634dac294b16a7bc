use std::fmt::Debug;

use crate::network::StationIdx;
use crate::path::PathSegment;
use crate::primitives::Time;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassengerId(pub u32);
impl Debug for PassengerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("p#{}", self.0))
    }
}

/// Demand category. Only the demand generator cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassengerKind {
    Worker,
    Student,
    Tourist,
    Occasional,
}

impl PassengerKind {
    pub const ALL: [PassengerKind; 4] = [
        PassengerKind::Worker,
        PassengerKind::Student,
        PassengerKind::Tourist,
        PassengerKind::Occasional,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripOutcome {
    Planned,
    Completed { arrival: Time },
    /// Abandoned: no route was left after a disruption.
    Cancelled,
    /// Replaced by a walking detour spliced in right after this trip.
    Diverted,
}

#[derive(Debug, Clone)]
pub struct Trip {
    departure: Time,
    path: PathSegment,
    /// Where the passenger wants to go. Rerouting may leave the path ending elsewhere.
    destination: StationIdx,
    outcome: TripOutcome,
}

impl Trip {
    pub fn new(departure: Time, path: PathSegment) -> Self {
        let destination = path.end_station();
        Self::towards(departure, path, destination)
    }

    /// A trip whose path does not (yet) reach `destination`.
    pub fn towards(departure: Time, path: PathSegment, destination: StationIdx) -> Self {
        Self {
            departure,
            path,
            destination,
            outcome: TripOutcome::Planned,
        }
    }

    pub fn departure(&self) -> Time {
        self.departure
    }

    pub fn path(&self) -> &PathSegment {
        &self.path
    }

    pub fn outcome(&self) -> TripOutcome {
        self.outcome
    }

    pub fn arrival(&self) -> Option<Time> {
        match self.outcome {
            TripOutcome::Completed { arrival } => Some(arrival),
            _ => None,
        }
    }

    pub fn is_planned(&self) -> bool {
        self.outcome == TripOutcome::Planned
    }

    pub fn origin(&self) -> StationIdx {
        self.path.start_station()
    }

    pub fn destination(&self) -> StationIdx {
        self.destination
    }

    /// The path was cut short of the destination.
    pub fn is_truncated(&self) -> bool {
        self.path.end_station() != self.destination
    }
}

#[derive(Debug, Clone)]
pub struct Passenger {
    pub id: PassengerId,
    pub kind: PassengerKind,
    trips: Vec<Trip>,
    next_trip: Option<usize>,
    current_trip: Option<usize>,
}

impl Passenger {
    /// `trips` must be ordered by departure.
    pub fn new(id: PassengerId, kind: PassengerKind, trips: Vec<Trip>) -> Self {
        let mut passenger = Self {
            id,
            kind,
            trips,
            next_trip: None,
            current_trip: None,
        };
        passenger.update_next_trip();
        passenger
    }

    pub fn trips(&self) -> &[Trip] {
        &self.trips
    }

    fn update_next_trip(&mut self) {
        self.next_trip = self.trips.iter().position(|t| t.is_planned());
    }

    pub fn next_trip(&self) -> Option<&Trip> {
        self.next_trip.map(|idx| &self.trips[idx])
    }

    pub fn current_trip(&self) -> Option<&Trip> {
        self.current_trip.map(|idx| &self.trips[idx])
    }

    pub fn current_trip_idx(&self) -> Option<usize> {
        self.current_trip
    }

    pub fn next_departure(&self) -> Option<Time> {
        self.next_trip().map(|t| t.departure)
    }

    /// The planned path the passenger follows right now, if mid-journey.
    pub fn current_path(&self) -> Option<&PathSegment> {
        self.current_trip()
            .filter(|t| t.is_planned())
            .map(|t| &t.path)
    }

    /// Starts the next trip; returns its start station.
    pub fn start_next_trip(&mut self) -> Option<StationIdx> {
        self.current_trip = self.next_trip;
        self.current_trip().map(|t| t.origin())
    }

    pub fn complete_current_trip(&mut self, arrival: Time) {
        if let Some(idx) = self.current_trip.take() {
            self.trips[idx].outcome = TripOutcome::Completed { arrival };
        }
        self.update_next_trip();
    }

    /// Leaves the journey without resolving the current trip.
    pub fn leave_current_trip(&mut self) {
        self.current_trip = None;
    }

    /// Sets the path of the trip the passenger is on, or about to start.
    pub fn set_active_path(&mut self, path: PathSegment) {
        if let Some(idx) = self.current_trip.or(self.next_trip) {
            self.trips[idx].path = path;
        }
    }

    /// Sets the path of the active trip together with a new destination.
    pub fn redirect_active_trip(&mut self, path: PathSegment, destination: StationIdx) {
        if let Some(idx) = self.current_trip.or(self.next_trip) {
            self.trips[idx].path = path;
            self.trips[idx].destination = destination;
        }
    }

    /// Cancels the trip the passenger is on, or about to start.
    pub fn cancel_active_trip(&mut self) {
        if let Some(idx) = self.current_trip.or(self.next_trip) {
            self.trips[idx].outcome = TripOutcome::Cancelled;
        }
        self.current_trip = None;
        self.update_next_trip();
    }

    /// Replaces the active trip by a detour trip that departs later from another station.
    pub fn divert_active_trip(&mut self, departure: Time, path: PathSegment) {
        if let Some(idx) = self.current_trip.or(self.next_trip) {
            self.trips[idx].outcome = TripOutcome::Diverted;
            let destination = self.trips[idx].destination;
            self.trips.insert(idx + 1, Trip::towards(departure, path, destination));
        }
        self.current_trip = None;
        self.update_next_trip();
    }

    pub fn count_outcomes(&self, outcome: TripOutcome) -> usize {
        self.trips
            .iter()
            .filter(|t| match (t.outcome, outcome) {
                (TripOutcome::Completed { .. }, TripOutcome::Completed { .. }) => true,
                (a, b) => a == b,
            })
            .count()
    }
}
