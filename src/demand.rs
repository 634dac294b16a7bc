use itertools::Itertools;
use log::{info, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::SimConfig;
use crate::graph::Graph;
use crate::network::StationIdx;
use crate::passenger::{Passenger, PassengerId, PassengerKind, Trip};
use crate::primitives::Time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DayType {
    Weekday,
    Saturday,
    Sunday,
}

impl DayType {
    /// Share of the weekday demand that travels on this day.
    pub fn demand_factor(self) -> f64 {
        match self {
            DayType::Weekday => 1.0,
            DayType::Saturday => 0.6,
            DayType::Sunday => 0.4,
        }
    }
}

/// Draws the passengers of one day. Every trip follows a path of the current graph; stations
/// without any outgoing path never become origins.
pub fn generate_passengers(
    graph: &Graph,
    config: &SimConfig,
    day_type: DayType,
    rng: &mut ChaCha8Rng,
) -> Vec<Passenger> {
    let count = (config.daily_passengers as f64 * day_type.demand_factor()).round() as usize;
    if count == 0 {
        return Vec::new();
    }
    let Ok(kinds) = WeightedIndex::new(config.kind_proportions) else {
        warn!("Invalid passenger kind proportions; no passengers generated");
        return Vec::new();
    };

    let reachable: Vec<Vec<StationIdx>> = graph
        .stations()
        .map(|from| {
            graph
                .stations()
                .filter(|&to| graph.find_path(from, to).is_ok())
                .collect()
        })
        .collect();
    let origins = graph
        .stations()
        .filter(|s| !reachable[s.0 as usize].is_empty())
        .collect_vec();
    if origins.is_empty() {
        warn!("No station pair is connected; no passengers generated");
        return Vec::new();
    }

    info!("Generating {} passengers for a {:?}", count, day_type);
    let generator = Generator {
        graph,
        reachable: &reachable,
        start_time: config.start_time,
        end_time: config.end_time,
    };
    (0..count)
        .map(|idx| {
            let kind = PassengerKind::ALL[kinds.sample(rng)];
            let origin = origins.choose(rng).copied().unwrap_or(origins[0]);
            let trips = generator.trips(kind, origin, rng);
            Passenger::new(PassengerId(idx as u32), kind, trips)
        })
        .collect()
}

struct Generator<'a> {
    graph: &'a Graph,
    reachable: &'a [Vec<StationIdx>],
    start_time: Time,
    end_time: Time,
}

impl Generator<'_> {
    fn trips(&self, kind: PassengerKind, origin: StationIdx, rng: &mut ChaCha8Rng) -> Vec<Trip> {
        let stops = self.stops(kind, origin, rng);
        let departures = self.departures(stops.len() - 1, rng);
        stops
            .iter()
            .tuple_windows()
            .zip(departures)
            .filter_map(|((&from, &to), departure)| {
                let path = self.graph.find_path(from, to).ok()?;
                Some(Trip::new(departure, path.clone()))
            })
            .collect()
    }

    /// Stations visited in order, starting at `origin`.
    fn stops(
        &self,
        kind: PassengerKind,
        origin: StationIdx,
        rng: &mut ChaCha8Rng,
    ) -> Vec<StationIdx> {
        let destination = self.pick(origin, rng);
        match kind {
            PassengerKind::Worker | PassengerKind::Student
                if self.connected(destination, origin) =>
            {
                vec![origin, destination, origin]
            }
            PassengerKind::Tourist => {
                let sight = self.pick(destination, rng);
                if sight != origin && sight != destination && self.connected(sight, origin) {
                    vec![origin, destination, sight, origin]
                } else if self.connected(destination, origin) {
                    vec![origin, destination, origin]
                } else {
                    vec![origin, destination]
                }
            }
            _ => vec![origin, destination],
        }
    }

    fn pick(&self, from: StationIdx, rng: &mut ChaCha8Rng) -> StationIdx {
        self.reachable[from.0 as usize]
            .choose(rng)
            .copied()
            .unwrap_or(from)
    }

    fn connected(&self, from: StationIdx, to: StationIdx) -> bool {
        from != to && self.graph.find_path(from, to).is_ok()
    }

    /// `count` strictly increasing departure times within the service window.
    fn departures(&self, count: usize, rng: &mut ChaCha8Rng) -> Vec<Time> {
        let last = (self.end_time - 1).max(self.start_time);
        let mut times = (0..count)
            .map(|_| rng.gen_range(self.start_time..=last))
            .sorted_unstable()
            .collect_vec();
        for idx in 1..times.len() {
            if times[idx] <= times[idx - 1] {
                times[idx] = times[idx - 1] + 1;
            }
        }
        times
    }
}
