use itertools::Itertools;
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelRefMutIterator, ParallelIterator};

use crate::col::{set_from, HashSet};
use crate::config::SimConfig;
use crate::demand::{generate_passengers, DayType};
use crate::disruption::{DisruptionSet, EventWindow, NetworkState};
use crate::graph::{BuildGraphError, Graph};
use crate::network::{LineIdx, NetworkDescription, StationIdx, TrainIdx};
use crate::passenger::Passenger;
use crate::path::PathSegment;
use crate::population::Population;
use crate::primitives::Time;
use crate::reroute::{self, Repair, RerouteStats};
use crate::timer::{Phase, PhaseTimer};
use crate::timetable::{RealTimetable, TimetableEntry};
use crate::train::{create_fleet, Train};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    Uninitialized,
    Ready,
    Running,
    Completed,
}

/// Reasons a simulation cannot be set up. All of them are configuration errors.
#[derive(Debug)]
pub enum InitError {
    InvalidTopology(BuildGraphError),
    InvalidParameters(&'static str),
    NoTrainsOnLine(LineIdx),
    LineTooShort(LineIdx),
    UnknownStation(StationIdx),
    NegativeDelay {
        from: StationIdx,
        to: StationIdx,
        delay: Time,
    },
    DelayOnNonAdjacentStations {
        from: StationIdx,
        to: StationIdx,
    },
    NoCommonLine {
        from: StationIdx,
        to: StationIdx,
    },
    InvalidEventWindow {
        start: Time,
        end: Time,
    },
}

impl From<BuildGraphError> for InitError {
    fn from(err: BuildGraphError) -> Self {
        match err {
            BuildGraphError::LineTooShort { line } => InitError::LineTooShort(line),
            BuildGraphError::UnknownStation { station, .. } => InitError::UnknownStation(station),
            err => InitError::InvalidTopology(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationError {
    NotReady(SimulationState),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub ticks: usize,
    pub boardings: usize,
    pub completed_trips: usize,
    /// Trips whose shortened path ended before their destination.
    pub abandoned_trips: usize,
    /// Trips repaired or cancelled when they were about to start.
    pub departure_repairs: RerouteStats,
    pub reroute: RerouteStats,
}

#[derive(Debug)]
struct World {
    graph: Graph,
    trains: Vec<Train>,
    population: Population,
    rng: ChaCha8Rng,
}

/// The trains whose next arrival falls within one dwell time of the earliest arrival, and the
/// time at which the batch is done.
pub fn select_batch(trains: &[Train], dwell_time: Time) -> Option<(Time, Vec<TrainIdx>)> {
    let min_arrival = trains.iter().map(|t| t.next_station_arrival).min()?;
    let until = min_arrival + dwell_time;
    let members = trains
        .iter()
        .filter(|t| t.next_station_arrival < until)
        .map(|t| t.id)
        .collect();
    Some((until, members))
}

pub struct Simulation {
    config: SimConfig,
    description: NetworkDescription,
    disruptions: DisruptionSet,
    state: SimulationState,
    current_time: Time,
    /// Events up to and including this time have been processed.
    last_event_time: Time,
    world: Option<World>,
    timetable: RealTimetable,
    stats: RunStats,
    timer: PhaseTimer,
}

impl Simulation {
    pub fn new(
        config: SimConfig,
        description: NetworkDescription,
        disruptions: DisruptionSet,
    ) -> Self {
        Self {
            current_time: config.start_time,
            config,
            description,
            disruptions,
            state: SimulationState::Uninitialized,
            last_event_time: Time::MIN,
            world: None,
            timetable: RealTimetable::new(),
            stats: RunStats::default(),
            timer: PhaseTimer::new(),
        }
    }

    /// Builds the graph, the fleet and the day's passengers and checks the disruptions.
    pub fn init(&mut self, day_type: DayType) -> Result<(), InitError> {
        if let Some(parameter) = self.config.invalid_parameter() {
            return Err(InitError::InvalidParameters(parameter));
        }

        info!("Building graph...");
        let graph = Graph::create(
            &self.description,
            self.config.train_capacity,
            self.config.travel_params(),
        )?;
        graph.log_summary();
        self.disruptions.validate(&graph)?;

        let trains = create_fleet(&graph, self.config.start_time, self.config.dwell_time)?;
        info!("Placed {} trains", trains.len());

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut population = Population::new(graph.num_stations(), trains.len());
        for passenger in generate_passengers(&graph, &self.config, day_type, &mut rng) {
            population.add_outside(passenger);
        }
        info!("Population: {} passengers", population.outside().len());

        self.disruptions.reset();
        self.timetable = RealTimetable::new();
        self.stats = RunStats::default();
        self.current_time = self.config.start_time;
        self.last_event_time = Time::MIN;
        self.world = Some(World {
            graph,
            trains,
            population,
            rng,
        });
        self.state = SimulationState::Ready;
        Ok(())
    }

    /// Runs ticks until the end time is reached or `max_steps` ticks were run. A negative
    /// `max_steps` means no limit. Returns the number of ticks run.
    pub fn run(&mut self, max_steps: i64) -> Result<usize, SimulationError> {
        self.check_ready()?;
        info!(
            "Running simulation from {} to {}",
            self.current_time, self.config.end_time
        );
        let mut steps = 0;
        while self.state != SimulationState::Completed && (max_steps < 0 || (steps as i64) < max_steps)
        {
            self.run_once()?;
            steps += 1;
        }
        info!(
            "Stopped at {} after {} ticks: {:?}",
            self.current_time, steps, self.stats
        );
        Ok(steps)
    }

    fn check_ready(&self) -> Result<(), SimulationError> {
        match self.state {
            SimulationState::Uninitialized => Err(SimulationError::NotReady(self.state)),
            _ => Ok(()),
        }
    }

    /// Advances the clock to the end of the next batch of train arrivals.
    pub fn run_once(&mut self) -> Result<(), SimulationError> {
        self.check_ready()?;
        let Self {
            config,
            disruptions,
            state,
            current_time,
            last_event_time,
            world,
            timetable,
            stats,
            timer,
            ..
        } = self;
        let Some(world) = world.as_mut() else {
            return Err(SimulationError::NotReady(*state));
        };
        if *state == SimulationState::Completed {
            return Ok(());
        }
        if *current_time >= config.end_time {
            *state = SimulationState::Completed;
            return Ok(());
        }
        *state = SimulationState::Running;

        let Some((new_time, batch)) = select_batch(&world.trains, config.dwell_time) else {
            *state = SimulationState::Completed;
            return Ok(());
        };
        debug!("Tick {}: {} trains until {}", *current_time, batch.len(), new_time);
        let now = *current_time;

        timer.measure(Phase::Disruptions, || {
            let window = EventWindow {
                after: *last_event_time,
                until: new_time,
            };
            let mut network = NetworkState {
                graph: &mut world.graph,
                population: &mut world.population,
                trains: &mut world.trains,
                rng: &mut world.rng,
                stats: &mut stats.reroute,
                now,
            };
            disruptions.apply(window, &mut network);
        });
        *last_event_time = new_time;
        *current_time = new_time;

        timer.measure(Phase::Departures, || {
            release_departed(world, new_time, &mut stats.departure_repairs)
        });

        let exchanges = timer.measure(Phase::Trains, || {
            serve_batch(world, &batch, timetable, config.dwell_time, now, new_time)
        });
        for exchange in exchanges {
            stats.boardings += exchange.boarded;
            stats.completed_trips += exchange.completed;
            stats.abandoned_trips += exchange.abandoned;
            for (station, passenger) in exchange.transfers {
                world
                    .population
                    .station_mut(station)
                    .insert(passenger.id, passenger);
            }
            for passenger in exchange.leaving {
                world.population.outside_mut().insert(passenger);
            }
        }

        stats.ticks += 1;
        if *current_time >= config.end_time {
            *state = SimulationState::Completed;
        }
        Ok(())
    }

    /// Adds a passenger that waits outside for its first trip.
    pub fn add_passenger(&mut self, passenger: Passenger) -> Result<(), SimulationError> {
        match self.world.as_mut() {
            Some(world) => {
                world.population.add_outside(passenger);
                Ok(())
            }
            None => Err(SimulationError::NotReady(self.state)),
        }
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.world.as_ref().map(|w| &w.graph)
    }

    pub fn graph_mut(&mut self) -> Option<&mut Graph> {
        self.world.as_mut().map(|w| &mut w.graph)
    }

    pub fn graph_and_population(&mut self) -> Option<(&Graph, &mut Population)> {
        self.world.as_mut().map(|w| (&w.graph, &mut w.population))
    }

    pub fn trains(&self) -> &[Train] {
        self.world.as_ref().map_or(&[], |w| &w.trains)
    }

    pub fn population(&self) -> Option<&Population> {
        self.world.as_ref().map(|w| &w.population)
    }

    pub fn population_mut(&mut self) -> Option<&mut Population> {
        self.world.as_mut().map(|w| &mut w.population)
    }

    pub fn real_timetable(&mut self) -> &[TimetableEntry] {
        self.timetable.entries()
    }

    pub fn disruptions(&self) -> &DisruptionSet {
        &self.disruptions
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn timer(&self) -> &PhaseTimer {
        &self.timer
    }

    pub fn check_partition(&mut self) -> bool {
        self.population_mut()
            .map_or(true, |population| population.check_partition())
    }
}

/// Moves every passenger whose next trip has departed into the trip's start station. A trip that
/// passes a closed station is repaired first.
fn release_departed(world: &mut World, time: Time, stats: &mut RerouteStats) {
    let graph = &world.graph;
    let closed: HashSet<StationIdx> =
        set_from(graph.stations().filter(|&s| graph.station(s).is_closed()));
    for passenger in world.population.take_departed(time) {
        start_trip(graph, &mut world.population, passenger, time, &closed, stats);
    }
}

fn start_trip(
    graph: &Graph,
    population: &mut Population,
    mut passenger: Passenger,
    time: Time,
    closed: &HashSet<StationIdx>,
    stats: &mut RerouteStats,
) {
    loop {
        let Some(trip) = passenger.next_trip() else {
            break;
        };
        if trip.departure() > time {
            break;
        }
        if trip.path().touches(closed) {
            match reroute::repair_planned_trip(graph, &mut passenger) {
                Repair::Repaired => stats.repaired += 1,
                Repair::Cancelled => {
                    stats.cancelled += 1;
                    continue;
                }
            }
        }
        let Some(start) = passenger.start_next_trip() else {
            break;
        };
        if passenger.current_path().is_some_and(|p| p.is_degenerate()) {
            if passenger.current_trip().is_some_and(|t| t.is_truncated()) {
                passenger.cancel_active_trip();
            } else {
                passenger.complete_current_trip(time);
            }
            continue;
        }
        population.station_mut(start).insert(passenger.id, passenger);
        return;
    }
    population.outside_mut().insert(passenger);
}

/// What one train hands back to the main thread after serving its stops.
#[derive(Debug, Default)]
struct Exchange {
    /// Passengers changing lines, with the station they wait in.
    transfers: Vec<(StationIdx, Passenger)>,
    /// Passengers done with their trip or with the network.
    leaving: Vec<Passenger>,
    boarded: usize,
    completed: usize,
    abandoned: usize,
}

/// Serves the trains of `batch` that still arrive before `until` once disruptions are applied.
/// No train arrives before `from`.
fn serve_batch(
    world: &mut World,
    batch: &[TrainIdx],
    timetable: &RealTimetable,
    dwell_time: Time,
    from: Time,
    until: Time,
) -> Vec<Exchange> {
    let graph = &world.graph;
    let population = &world.population;
    let batch: HashSet<TrainIdx> = set_from(batch.iter().copied());
    world
        .trains
        .par_iter_mut()
        .filter(|train| batch.contains(&train.id) && train.next_station_arrival < until)
        .map(|train| {
            train.next_station_arrival = train.next_station_arrival.max(from);
            serve_train(train, graph, population, timetable, dwell_time, until)
        })
        .collect()
}

/// Moves the train through every stop it reaches before `until`. Closed stations are passed
/// without stopping, so a train may reach several stations in one batch.
fn serve_train(
    train: &mut Train,
    graph: &Graph,
    population: &Population,
    timetable: &RealTimetable,
    dwell_time: Time,
    until: Time,
) -> Exchange {
    let mut exchange = Exchange::default();
    let line = graph.line(train.line);
    for _ in 0..=(2 * line.stations.len()) {
        if train.next_station_arrival >= until {
            break;
        }
        let arrival = train.next_station_arrival;
        let station = train.arrive(line);
        if graph.station(station).is_closed() {
            train.next_station_arrival = arrival + graph.segment_time(station, train.next_station);
            continue;
        }
        if let Some(entry) = TimetableEntry::at_stop(train, graph, dwell_time) {
            timetable.record(entry);
        }
        exchange_passengers(
            train,
            graph,
            station,
            arrival,
            line.capacity,
            population,
            &mut exchange,
        );
        train.next_station_arrival =
            arrival + dwell_time + graph.segment_time(station, train.next_station);
    }
    exchange
}

enum Alighting {
    StayOn,
    Arrive,
    /// End of a path that was cut short of the destination.
    Stranded,
    Transfer,
    Leave,
}

fn alighting(passenger: &Passenger, train: &Train, station: StationIdx) -> Alighting {
    let Some(trip) = passenger.current_trip().filter(|t| t.is_planned()) else {
        return Alighting::Leave;
    };
    let path = trip.path();
    if path.end_station() == station {
        if trip.is_truncated() {
            return Alighting::Stranded;
        }
        return Alighting::Arrive;
    }
    match path.next_hop(station) {
        Some((line, next)) if line == train.line && next == train.next_station => {
            Alighting::StayOn
        }
        Some(_) => Alighting::Transfer,
        None => Alighting::Leave,
    }
}

fn boards(passenger: &Passenger, train: &Train, station: StationIdx) -> bool {
    passenger
        .current_path()
        .and_then(|path| path.next_hop(station))
        == Some((train.line, train.next_station))
}

/// The path of a shortened trip continued from `station` to its destination, if there is one again.
fn resume_path(graph: &Graph, passenger: &Passenger, station: StationIdx) -> Option<PathSegment> {
    let trip = passenger.current_trip()?;
    let rest = graph.find_path(station, trip.destination()).ok()?;
    trip.path().reroute(rest).filter(|it| it.check_validity())
}

fn exchange_passengers(
    train: &Train,
    graph: &Graph,
    station: StationIdx,
    arrival: Time,
    capacity: usize,
    population: &Population,
    exchange: &mut Exchange,
) {
    let mut riders = population.lock_train(train.id);
    let alighting_ids = riders
        .values()
        .filter(|p| !matches!(alighting(p, train, station), Alighting::StayOn))
        .map(|p| p.id)
        .sorted_unstable()
        .collect_vec();
    for id in alighting_ids {
        let Some(mut passenger) = riders.remove(&id) else {
            continue;
        };
        match alighting(&passenger, train, station) {
            Alighting::Arrive => {
                passenger.complete_current_trip(arrival);
                exchange.completed += 1;
                exchange.leaving.push(passenger);
            }
            Alighting::Stranded => match resume_path(graph, &passenger, station) {
                Some(path) => {
                    passenger.set_active_path(path);
                    exchange.transfers.push((station, passenger));
                }
                None => {
                    warn!("Passenger {:?} gave up at {:?}", passenger.id, station);
                    passenger.cancel_active_trip();
                    exchange.abandoned += 1;
                    exchange.leaving.push(passenger);
                }
            },
            Alighting::Transfer => exchange.transfers.push((station, passenger)),
            Alighting::Leave => {
                if passenger.current_path().is_some() {
                    passenger.cancel_active_trip();
                } else {
                    passenger.leave_current_trip();
                }
                exchange.leaving.push(passenger);
            }
            Alighting::StayOn => {
                riders.insert(id, passenger);
            }
        }
    }

    let mut waiting = population.lock_station(station);
    let free = capacity.saturating_sub(riders.len());
    let boarding_ids = waiting
        .values()
        .filter(|p| boards(p, train, station))
        .map(|p| p.id)
        .sorted_unstable()
        .take(free)
        .collect_vec();
    for id in boarding_ids {
        if let Some(passenger) = waiting.remove(&id) {
            riders.insert(id, passenger);
            exchange.boarded += 1;
        }
    }
}
