use log::{error, info, warn};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::col::{set_from, HashSet};
use crate::graph::Graph;
use crate::network::StationIdx;
use crate::passenger::{Passenger, PassengerKind, Trip};
use crate::path::PathSegment;
use crate::population::Population;
use crate::primitives::Time;
use crate::reroute::{self, RerouteStats};
use crate::simulation::InitError;
use crate::train::Train;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisruptionEvent {
    StationClosed {
        station: StationIdx,
        start: Time,
        end: Time,
    },
    /// Closes every station between `from` and `to` on a line serving both.
    LineClosed {
        from: StationIdx,
        to: StationIdx,
        start: Time,
        end: Time,
    },
    /// Extra seconds on the hop between two adjacent stations, both directions.
    LineDelay {
        from: StationIdx,
        to: StationIdx,
        delay: Time,
        start: Time,
        end: Time,
    },
    /// `size` extra passengers appear at `station` at `time`.
    AttendancePeak {
        station: StationIdx,
        time: Time,
        size: usize,
    },
}

impl DisruptionEvent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DisruptionEvent::StationClosed { .. } => "station_closed",
            DisruptionEvent::LineClosed { .. } => "line_closed",
            DisruptionEvent::LineDelay { .. } => "line_delay",
            DisruptionEvent::AttendancePeak { .. } => "attendance_peak",
        }
    }

    pub fn start(&self) -> Time {
        match *self {
            DisruptionEvent::StationClosed { start, .. }
            | DisruptionEvent::LineClosed { start, .. }
            | DisruptionEvent::LineDelay { start, .. } => start,
            DisruptionEvent::AttendancePeak { time, .. } => time,
        }
    }

    /// `None` for instantaneous events.
    pub fn end(&self) -> Option<Time> {
        match *self {
            DisruptionEvent::StationClosed { end, .. }
            | DisruptionEvent::LineClosed { end, .. }
            | DisruptionEvent::LineDelay { end, .. } => Some(end),
            DisruptionEvent::AttendancePeak { .. } => None,
        }
    }

    fn validate(&self, graph: &Graph) -> Result<(), InitError> {
        let known = |station: StationIdx| {
            if graph.contains(station) {
                Ok(())
            } else {
                Err(InitError::UnknownStation(station))
            }
        };
        if let Some(end) = self.end() {
            if end < self.start() {
                return Err(InitError::InvalidEventWindow {
                    start: self.start(),
                    end,
                });
            }
        }
        match *self {
            DisruptionEvent::StationClosed { station, .. }
            | DisruptionEvent::AttendancePeak { station, .. } => known(station),
            DisruptionEvent::LineClosed { from, to, .. } => {
                known(from)?;
                known(to)?;
                match graph.common_line(from, to) {
                    Some(_) => Ok(()),
                    None => Err(InitError::NoCommonLine { from, to }),
                }
            }
            DisruptionEvent::LineDelay {
                from, to, delay, ..
            } => {
                known(from)?;
                known(to)?;
                if delay < 0 {
                    Err(InitError::NegativeDelay { from, to, delay })
                } else if !graph.are_adjacent(from, to) {
                    Err(InitError::DelayOnNonAdjacentStations { from, to })
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Pending,
    Active,
    Finished,
}

#[derive(Debug, Clone)]
struct Scheduled {
    event: DisruptionEvent,
    state: EventState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisruptionLogEntry {
    /// Simulation time of the tick that processed the event.
    pub time: Time,
    pub event: DisruptionEvent,
}

/// Events fire when their time falls in `(after, until]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub after: Time,
    pub until: Time,
}

impl EventWindow {
    pub fn contains(&self, time: Time) -> bool {
        self.after < time && time <= self.until
    }
}

/// Everything a disruption may change.
pub struct NetworkState<'a> {
    pub graph: &'a mut Graph,
    pub population: &'a mut Population,
    pub trains: &'a mut [Train],
    pub rng: &'a mut ChaCha8Rng,
    pub stats: &'a mut RerouteStats,
    pub now: Time,
}

/// The four event lists, processed in a fixed order: station closures, line delays, line
/// closures, attendance peaks.
#[derive(Debug, Clone, Default)]
pub struct DisruptionSet {
    station_closed: Vec<Scheduled>,
    line_delay: Vec<Scheduled>,
    line_closed: Vec<Scheduled>,
    attendance_peak: Vec<Scheduled>,
    activated: Vec<DisruptionLogEntry>,
    deactivated: Vec<DisruptionLogEntry>,
}

impl DisruptionSet {
    pub fn new(events: impl IntoIterator<Item = DisruptionEvent>) -> Self {
        let mut set = Self::default();
        for event in events {
            set.push(event);
        }
        set
    }

    pub fn push(&mut self, event: DisruptionEvent) {
        let list = match event {
            DisruptionEvent::StationClosed { .. } => &mut self.station_closed,
            DisruptionEvent::LineDelay { .. } => &mut self.line_delay,
            DisruptionEvent::LineClosed { .. } => &mut self.line_closed,
            DisruptionEvent::AttendancePeak { .. } => &mut self.attendance_peak,
        };
        list.push(Scheduled {
            event,
            state: EventState::Pending,
        });
    }

    fn all(&self) -> impl Iterator<Item = &Scheduled> {
        self.station_closed
            .iter()
            .chain(&self.line_delay)
            .chain(&self.line_closed)
            .chain(&self.attendance_peak)
    }

    pub fn events(&self) -> impl Iterator<Item = &DisruptionEvent> {
        self.all().map(|it| &it.event)
    }

    pub fn len(&self) -> usize {
        self.all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_finished(&self) -> usize {
        self.all()
            .filter(|it| it.state == EventState::Finished)
            .count()
    }

    /// Marks every event as pending again and forgets the logs.
    pub fn reset(&mut self) {
        for scheduled in self
            .station_closed
            .iter_mut()
            .chain(&mut self.line_delay)
            .chain(&mut self.line_closed)
            .chain(&mut self.attendance_peak)
        {
            scheduled.state = EventState::Pending;
        }
        self.activated.clear();
        self.deactivated.clear();
    }

    pub fn activated(&self) -> &[DisruptionLogEntry] {
        &self.activated
    }

    pub fn deactivated(&self) -> &[DisruptionLogEntry] {
        &self.deactivated
    }

    pub fn validate(&self, graph: &Graph) -> Result<(), InitError> {
        self.events().try_for_each(|event| event.validate(graph))
    }

    /// Activates and deactivates every event whose start or end lies in `window`.
    pub fn apply(&mut self, window: EventWindow, state: &mut NetworkState) {
        let lists = [
            &mut self.station_closed,
            &mut self.line_delay,
            &mut self.line_closed,
            &mut self.attendance_peak,
        ];
        for list in lists {
            for scheduled in list.iter_mut() {
                process(
                    scheduled,
                    window,
                    state,
                    &mut self.activated,
                    &mut self.deactivated,
                );
            }
        }
    }
}

fn process(
    scheduled: &mut Scheduled,
    window: EventWindow,
    state: &mut NetworkState,
    activated: &mut Vec<DisruptionLogEntry>,
    deactivated: &mut Vec<DisruptionLogEntry>,
) {
    if scheduled.state == EventState::Pending && window.contains(scheduled.event.start()) {
        info!("Activating {:?}", scheduled.event);
        activate(&scheduled.event, state);
        activated.push(DisruptionLogEntry {
            time: state.now,
            event: scheduled.event.clone(),
        });
        scheduled.state = match scheduled.event.end() {
            Some(_) => EventState::Active,
            None => EventState::Finished,
        };
    }
    if scheduled.state == EventState::Active
        && scheduled.event.end().is_some_and(|end| window.contains(end))
    {
        info!("Deactivating {:?}", scheduled.event);
        deactivate(&scheduled.event, state);
        deactivated.push(DisruptionLogEntry {
            time: state.now,
            event: scheduled.event.clone(),
        });
        scheduled.state = EventState::Finished;
    }
}

fn activate(event: &DisruptionEvent, state: &mut NetworkState) {
    match *event {
        DisruptionEvent::StationClosed { station, .. } => close_stations(state, &[station]),
        DisruptionEvent::LineClosed { from, to, .. } => {
            let stations = state.graph.stations_between(from, to).unwrap_or_default();
            close_stations(state, &stations);
        }
        DisruptionEvent::LineDelay {
            from, to, delay, ..
        } => change_delay(state, from, to, delay),
        DisruptionEvent::AttendancePeak {
            station,
            time,
            size,
        } => spawn_attendance(state, station, time, size),
    }
}

fn deactivate(event: &DisruptionEvent, state: &mut NetworkState) {
    match *event {
        DisruptionEvent::StationClosed { station, .. } => reopen_stations(state, &[station]),
        DisruptionEvent::LineClosed { from, to, .. } => {
            let stations = state.graph.stations_between(from, to).unwrap_or_default();
            reopen_stations(state, &stations);
        }
        DisruptionEvent::LineDelay { from, to, .. } => change_delay(state, from, to, 0),
        DisruptionEvent::AttendancePeak { .. } => {}
    }
}

fn regenerate(graph: &mut Graph) {
    // The previous paths stay in place if the new ones cannot be built.
    if let Err(err) = graph.regenerate() {
        error!("Could not regenerate paths: {:?}", err);
    }
}

fn close_stations(state: &mut NetworkState, stations: &[StationIdx]) {
    let closed: HashSet<StationIdx> = set_from(
        stations
            .iter()
            .copied()
            .filter(|&s| state.graph.station_mut(s).close()),
    );
    if closed.is_empty() {
        return;
    }
    regenerate(state.graph);
    *state.stats += reroute::reroute_population(
        state.graph,
        state.population,
        state.trains,
        &closed,
        state.now,
    );
}

fn reopen_stations(state: &mut NetworkState, stations: &[StationIdx]) {
    let mut changed = false;
    for &station in stations {
        changed |= state.graph.station_mut(station).reopen();
    }
    if !changed {
        return;
    }
    regenerate(state.graph);
    let still_closed: HashSet<StationIdx> = set_from(
        state
            .graph
            .stations()
            .filter(|&s| state.graph.station(s).is_closed()),
    );
    *state.stats += reroute::reroute_population(
        state.graph,
        state.population,
        state.trains,
        &still_closed,
        state.now,
    );
}

fn change_delay(state: &mut NetworkState, from: StationIdx, to: StationIdx, delay: Time) {
    let old_duration = state.graph.segment_time(from, to);
    if let Err(err) = state.graph.add_delay(from, to, delay) {
        warn!("Ignoring delay between {:?} and {:?}: {:?}", from, to, err);
        return;
    }
    let new_duration = state.graph.segment_time(from, to);
    for train in state.trains.iter_mut().filter(|t| t.is_between(from, to)) {
        adjust_arrival(train, state.now, old_duration, new_duration);
    }
}

/// Scales the remaining travel time of a train on a segment whose duration changed.
fn adjust_arrival(train: &mut Train, now: Time, old_duration: Time, new_duration: Time) {
    let time_left = (train.next_station_arrival - now).abs();
    if old_duration <= 0 || time_left > old_duration {
        // Still dwelling at the start of the segment.
        train.next_station_arrival += new_duration - old_duration;
    } else {
        let percent = time_left as f64 / old_duration as f64;
        train.next_station_arrival = now + (new_duration as f64 * percent).round() as Time;
    }
}

/// Spawns `size` passengers with random destinations at `station`. Passengers without a route,
/// or at a closed station, stay outside with their trip cancelled.
fn spawn_attendance(state: &mut NetworkState, station: StationIdx, time: Time, size: usize) {
    let closed = state.graph.station(station).is_closed();
    let destinations: Vec<StationIdx> = state.graph.stations().filter(|&s| s != station).collect();
    let mut unroutable = 0;
    for _ in 0..size {
        let Some(&destination) = destinations.choose(&mut *state.rng) else {
            break;
        };
        let path = match state.graph.find_path(station, destination) {
            Ok(path) if !closed => Some(path.clone()),
            _ => None,
        };
        let id = state.population.next_passenger_id();
        match path {
            Some(path) => {
                let trip = Trip::new(time, path);
                let mut passenger = Passenger::new(id, PassengerKind::Occasional, vec![trip]);
                passenger.start_next_trip();
                state.population.add_in_station(station, passenger);
            }
            None => {
                let trip = Trip::towards(time, PathSegment::single(station), destination);
                let mut passenger = Passenger::new(id, PassengerKind::Occasional, vec![trip]);
                passenger.cancel_active_trip();
                state.population.add_outside(passenger);
                unroutable += 1;
            }
        }
    }
    if unroutable > 0 {
        warn!(
            "{} of {} peak passengers at {:?} have no route",
            unroutable, size, station
        );
        state.stats.cancelled += unroutable;
    }
}
