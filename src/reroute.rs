use std::ops::AddAssign;

use itertools::Itertools;
use log::{debug, warn};

use crate::col::HashSet;
use crate::geometry;
use crate::graph::Graph;
use crate::network::StationIdx;
use crate::passenger::Passenger;
use crate::path::PathSegment;
use crate::population::{Outside, Population};
use crate::primitives::Time;
use crate::train::Train;

/// Counters of what rerouting did to the trips it touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RerouteStats {
    pub repaired: usize,
    pub truncated: usize,
    pub diverted: usize,
    pub cancelled: usize,
}

impl AddAssign for RerouteStats {
    fn add_assign(&mut self, rhs: Self) {
        self.repaired += rhs.repaired;
        self.truncated += rhs.truncated;
        self.diverted += rhs.diverted;
        self.cancelled += rhs.cancelled;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    Repaired,
    Cancelled,
}

/// Replaces every path that passes one of the `affected` stations.
pub fn reroute_population(
    graph: &Graph,
    population: &mut Population,
    trains: &[Train],
    affected: &HashSet<StationIdx>,
    now: Time,
) -> RerouteStats {
    let mut stats = RerouteStats::default();
    if affected.is_empty() {
        return stats;
    }

    reroute_outside(graph, population.outside_mut(), affected, &mut stats);

    for station in population.waiting_stations().collect_vec() {
        if population.station_mut(station).is_empty() {
            continue;
        }
        if graph.station(station).is_closed() {
            evacuate_station(graph, population, station, now, &mut stats);
        } else {
            reroute_waiting(graph, population, station, affected, &mut stats);
        }
    }

    for train in trains {
        reroute_riders(graph, population, train, affected, &mut stats);
    }

    debug!("Rerouted around {:?}: {:?}", affected, stats);
    stats
}

fn reroute_outside(
    graph: &Graph,
    outside: &mut Outside,
    affected: &HashSet<StationIdx>,
    stats: &mut RerouteStats,
) {
    let mut changed = false;
    for passenger in outside.passengers_mut() {
        let touched = passenger
            .next_trip()
            .is_some_and(|trip| trip.path().touches(affected));
        if !touched {
            continue;
        }
        changed = true;
        match repair_planned_trip(graph, passenger) {
            Repair::Repaired => stats.repaired += 1,
            Repair::Cancelled => stats.cancelled += 1,
        }
    }
    if changed {
        outside.resort();
    }
}

/// Finds a new path for the trip the passenger is about to start.
///
/// A closed start station is replaced by the second station of the path if that one is open,
/// otherwise by the nearest open station. Paths with fewer than three stations and a closed start
/// are cancelled.
pub(crate) fn repair_planned_trip(graph: &Graph, passenger: &mut Passenger) -> Repair {
    let Some(trip) = passenger.next_trip() else {
        return Repair::Cancelled;
    };
    let path = trip.path();
    let end = trip.destination();
    let mut start = path.start_station();

    if graph.station(start).is_closed() {
        if path.len() < 3 {
            return cancel(passenger);
        }
        let second = path.stations()[1];
        start = if graph.station(second).is_open() {
            second
        } else {
            match graph.find_nearest_open_station(graph.station(start).position) {
                Some(nearest) => nearest,
                None => return cancel(passenger),
            }
        };
    }
    if start == end {
        return cancel(passenger);
    }

    match graph.path_or_repair(start, end) {
        Some(repaired) if !repaired.is_degenerate() => {
            passenger.set_active_path(repaired);
            Repair::Repaired
        }
        _ => cancel(passenger),
    }
}

fn cancel(passenger: &mut Passenger) -> Repair {
    warn!("Cancelled a trip of passenger {:?}", passenger.id);
    passenger.cancel_active_trip();
    Repair::Cancelled
}

/// Everybody waiting in a closed station walks to the next open station of their path and
/// starts a new trip from there. All of them leave the station.
fn evacuate_station(
    graph: &Graph,
    population: &mut Population,
    station: StationIdx,
    now: Time,
    stats: &mut RerouteStats,
) {
    let waiting = population.station_mut(station).keys().copied().collect_vec();
    for id in waiting {
        if let Some(passenger) = population.station_mut(station).get_mut(&id) {
            match divert_on_foot(graph, passenger, station, now) {
                Evacuation::Arrived => {}
                Evacuation::Diverted => stats.diverted += 1,
                Evacuation::Cancelled => stats.cancelled += 1,
            }
        }
        population.evict(station, id);
    }
}

enum Evacuation {
    Arrived,
    Diverted,
    Cancelled,
}

fn divert_on_foot(
    graph: &Graph,
    passenger: &mut Passenger,
    station: StationIdx,
    now: Time,
) -> Evacuation {
    let Some(trip) = passenger.current_trip().filter(|t| t.is_planned()) else {
        return Evacuation::Cancelled;
    };
    let destination = trip.destination();
    if destination == station {
        passenger.complete_current_trip(now);
        return Evacuation::Arrived;
    }
    let next_open = trip.path().remaining_from(station).and_then(|rest| {
        rest.stations()
            .iter()
            .skip(1)
            .copied()
            .find(|&s| graph.station(s).is_open())
    });
    let detour = next_open.and_then(|next| {
        let walk = geometry::walking_time(graph.station_distance(station, next));
        graph
            .path_or_repair(next, destination)
            .map(|path| (now + walk, path))
    });
    match detour {
        Some((departure, path)) => {
            passenger.divert_active_trip(departure, path);
            Evacuation::Diverted
        }
        None => {
            cancel(passenger);
            Evacuation::Cancelled
        }
    }
}

/// Passengers waiting in an open station whose remaining path runs into an affected station.
fn reroute_waiting(
    graph: &Graph,
    population: &mut Population,
    station: StationIdx,
    affected: &HashSet<StationIdx>,
    stats: &mut RerouteStats,
) {
    let mut stranded = Vec::new();
    for passenger in population.station_mut(station).values_mut() {
        let Some(trip) = passenger.current_trip().filter(|t| t.is_planned()) else {
            continue;
        };
        let path = trip.path();
        let Some(rest) = path.remaining_from(station) else {
            continue;
        };
        if !rest.touches(affected) {
            continue;
        }

        let replacement = graph
            .path_or_repair(station, trip.destination())
            .filter(|it| !it.is_degenerate());
        if let Some(replacement) = replacement {
            let rerouted = splice(path, &replacement);
            passenger.set_active_path(rerouted);
            stats.repaired += 1;
            continue;
        }

        match rest.truncate_before(affected) {
            Some(truncated) if !truncated.is_degenerate() => {
                let rerouted = splice(path, &truncated);
                passenger.set_active_path(rerouted);
                stats.truncated += 1;
            }
            _ => {
                cancel(passenger);
                stats.cancelled += 1;
                stranded.push(passenger.id);
            }
        }
    }
    for id in stranded {
        population.evict(station, id);
    }
}

/// `path` up to the start of `replacement`, then `replacement`. If that would revisit a station,
/// the travelled part is dropped.
fn splice(path: &PathSegment, replacement: &PathSegment) -> PathSegment {
    path.reroute(replacement)
        .filter(|it| it.check_validity())
        .unwrap_or_else(|| replacement.clone())
}

/// Riders ride on to the next open station of their train and continue from there.
fn reroute_riders(
    graph: &Graph,
    population: &mut Population,
    train: &Train,
    affected: &HashSet<StationIdx>,
    stats: &mut RerouteStats,
) {
    let ride = train.ride_to_next_open_station(graph);
    for passenger in population.train_mut(train.id).values_mut() {
        let Some(trip) = passenger.current_trip().filter(|t| t.is_planned()) else {
            continue;
        };
        let path = trip.path();
        let Some(rest) = path.remaining_from(train.next_station) else {
            continue;
        };
        if !rest.touches(affected) {
            continue;
        }
        let Some(ride) = &ride else {
            cancel(passenger);
            stats.cancelled += 1;
            continue;
        };
        let next_open = ride.end_station();

        let intended = trip.destination();
        let mut destination = intended;
        if graph.station(destination).is_closed() {
            destination = rest
                .stations()
                .iter()
                .rev()
                .copied()
                .find(|&s| graph.station(s).is_open())
                .or_else(|| graph.find_nearest_open_station(graph.station(destination).position))
                .unwrap_or(next_open);
        }
        let tail = graph
            .path_or_repair(next_open, destination)
            .unwrap_or_else(|| PathSegment::single(next_open));

        let travelled = path
            .segment(path.start_station(), train.next_station)
            .and_then(|it| it.append(ride));
        let rerouted = travelled
            .as_ref()
            .and_then(|it| it.append(&tail))
            .filter(|it| it.check_validity())
            .or_else(|| travelled.filter(|it| it.check_validity()));
        match rerouted {
            Some(rerouted) => {
                let truncated = rerouted.end_station() != destination;
                if destination == intended {
                    passenger.set_active_path(rerouted);
                } else {
                    passenger.redirect_active_trip(rerouted, destination);
                }
                if truncated {
                    stats.truncated += 1;
                } else {
                    stats.repaired += 1;
                }
            }
            None => {
                cancel(passenger);
                stats.cancelled += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::col::set_from;
    use crate::graph::Graph;
    use crate::network::{LineIdx, TrainIdx};
    use crate::passenger::{PassengerId, PassengerKind, Trip, TripOutcome};
    use crate::test::sample::{doubling_back_line, ring_network, single_line_network, travel_params};
    use crate::train::Direction;

    fn s(id: u32) -> StationIdx {
        StationIdx(id)
    }

    fn passenger(graph: &Graph, id: u32, from: u32, to: u32, departure: Time) -> Passenger {
        let path = graph.find_path(s(from), s(to)).unwrap().clone();
        Passenger::new(
            PassengerId(id),
            PassengerKind::Occasional,
            vec![Trip::new(departure, path)],
        )
    }

    fn close(graph: &mut Graph, stations: &[u32]) -> HashSet<StationIdx> {
        for &station in stations {
            graph.station_mut(s(station)).close();
        }
        graph.regenerate().unwrap();
        set_from(stations.iter().map(|&id| s(id)))
    }

    #[test]
    fn outside_trip_is_repaired_around_closure() {
        let mut graph = Graph::create(&ring_network(), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        population.add_outside(passenger(&graph, 0, 0, 2, 100));
        let affected = close(&mut graph, &[1]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 0);
        assert_eq!(stats.repaired, 1);
        let trip = population.outside().get(PassengerId(0)).unwrap().next_trip().unwrap();
        assert_eq!(trip.path().stations(), &[s(0), s(3), s(2)]);
        assert!(population.check_partition());
    }

    #[test]
    fn outside_trip_from_closed_short_start_is_cancelled() {
        let mut graph = Graph::create(&single_line_network(3), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        population.add_outside(passenger(&graph, 0, 0, 1, 100));
        let affected = close(&mut graph, &[0]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 0);
        assert_eq!(stats.cancelled, 1);
        let p = population.outside().get(PassengerId(0)).unwrap();
        assert_eq!(p.trips()[0].outcome(), TripOutcome::Cancelled);
        assert!(population.outside().departures().is_empty());
    }

    #[test]
    fn outside_trip_from_closed_start_uses_second_station() {
        let mut graph = Graph::create(&single_line_network(4), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        population.add_outside(passenger(&graph, 0, 0, 3, 100));
        let affected = close(&mut graph, &[0]);

        reroute_population(&graph, &mut population, &[], &affected, 0);
        let trip = population.outside().get(PassengerId(0)).unwrap().next_trip().unwrap();
        assert_eq!(trip.path().stations(), &[s(1), s(2), s(3)]);
    }

    #[test]
    fn waiting_in_closed_station_walks_on() {
        let mut graph = Graph::create(&single_line_network(4), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        let mut p = passenger(&graph, 0, 1, 3, 0);
        p.start_next_trip();
        population.add_in_station(s(1), p);
        let affected = close(&mut graph, &[1]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 1000);
        assert_eq!(stats.diverted, 1);
        assert_eq!(population.num_in_station(s(1)), 0);
        let p = population.outside().get(PassengerId(0)).unwrap();
        assert_eq!(p.trips()[0].outcome(), TripOutcome::Diverted);
        let detour = p.next_trip().unwrap();
        assert!(detour.departure() > 1000);
        assert_eq!(detour.path().stations(), &[s(2), s(3)]);
        assert!(population.check_partition());
    }

    #[test]
    fn waiting_passenger_is_repaired_towards_destination() {
        let mut graph = Graph::create(&single_line_network(5), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        let mut p = passenger(&graph, 0, 0, 4, 0);
        p.start_next_trip();
        population.add_in_station(s(0), p);
        let affected = close(&mut graph, &[3]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 0);
        // The repair path to the open station closest to 4 is 0-1-2.
        assert_eq!(stats.repaired, 1);
        let waiting = population.station_mut(s(0));
        let trip = waiting[&PassengerId(0)].current_trip().unwrap();
        assert_eq!(trip.path().stations(), &[s(0), s(1), s(2)]);
        assert_eq!(trip.destination(), s(4));
    }

    #[test]
    fn waiting_passenger_is_truncated_before_closure() {
        let mut graph = Graph::create(&doubling_back_line(), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        let mut p = passenger(&graph, 0, 0, 3, 0);
        p.start_next_trip();
        population.add_in_station(s(0), p);
        let affected = close(&mut graph, &[2]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 0);
        assert_eq!(stats.truncated, 1);
        assert_eq!(stats.repaired, 0);
        let waiting = population.station_mut(s(0));
        let trip = waiting[&PassengerId(0)].current_trip().unwrap();
        assert_eq!(trip.path().stations(), &[s(0), s(1)]);
        assert_eq!(trip.destination(), s(3));
        assert!(trip.is_truncated());
        assert_eq!(trip.outcome(), TripOutcome::Planned);
    }

    #[test]
    fn waiting_at_own_destination_in_closed_station_arrives() {
        let mut graph = Graph::create(&single_line_network(3), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        let mut p = Passenger::new(
            PassengerId(0),
            PassengerKind::Occasional,
            vec![Trip::new(0, PathSegment::single(s(1)))],
        );
        p.start_next_trip();
        population.add_in_station(s(1), p);
        let affected = close(&mut graph, &[1]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 700);
        assert_eq!(stats, RerouteStats::default());
        assert_eq!(population.num_in_station(s(1)), 0);
        let p = population.outside().get(PassengerId(0)).unwrap();
        assert_eq!(p.trips()[0].arrival(), Some(700));
        assert!(population.check_partition());
    }

    #[test]
    fn waiting_passenger_without_route_is_evicted() {
        let mut graph = Graph::create(&single_line_network(3), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        let mut p = passenger(&graph, 0, 0, 2, 0);
        p.start_next_trip();
        population.add_in_station(s(0), p);
        let affected = close(&mut graph, &[1]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 0);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(population.num_in_station(s(0)), 0);
        assert_eq!(population.outside().len(), 1);
        assert!(population.check_partition());
    }

    #[test]
    fn riders_continue_from_next_open_station() {
        let mut graph = Graph::create(&single_line_network(5), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 1);
        let mut train = Train::new(TrainIdx(0), LineIdx(0), Direction::Up, s(0), 0);
        train.arrive(graph.line(LineIdx(0)));
        let mut p = passenger(&graph, 0, 0, 2, 0);
        p.start_next_trip();
        population.train_mut(TrainIdx(0)).insert(PassengerId(0), p);
        let affected = close(&mut graph, &[1, 2]);

        let stats = reroute_population(&graph, &mut population, &[train], &affected, 0);
        // The destination is closed: the rider is taken to the open station nearest to it.
        assert_eq!(stats.repaired, 1);
        let riders = population.train_mut(TrainIdx(0));
        let trip = riders[&PassengerId(0)].current_trip().unwrap();
        assert_eq!(trip.path().stations(), &[s(0), s(1), s(2), s(3)]);
        assert_eq!(trip.destination(), s(3));
        assert!(!trip.is_truncated());
    }

    #[test]
    fn rider_without_route_is_truncated_at_next_open_station() {
        let mut graph = Graph::create(&doubling_back_line(), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 1);
        let mut train = Train::new(TrainIdx(0), LineIdx(0), Direction::Up, s(0), 0);
        train.arrive(graph.line(LineIdx(0)));
        let mut p = passenger(&graph, 0, 0, 3, 0);
        p.start_next_trip();
        population.train_mut(TrainIdx(0)).insert(PassengerId(0), p);
        let affected = close(&mut graph, &[2]);

        let stats = reroute_population(&graph, &mut population, &[train], &affected, 0);
        assert_eq!(stats.truncated, 1);
        assert_eq!(stats.repaired, 0);
        let riders = population.train_mut(TrainIdx(0));
        let trip = riders[&PassengerId(0)].current_trip().unwrap();
        assert_eq!(trip.path().stations(), &[s(0), s(1)]);
        assert_eq!(trip.destination(), s(3));
        assert!(trip.is_truncated());
    }

    #[test]
    fn unaffected_paths_are_left_alone() {
        let mut graph = Graph::create(&single_line_network(5), 100, travel_params()).unwrap();
        let mut population = Population::new(graph.num_stations(), 0);
        population.add_outside(passenger(&graph, 0, 0, 2, 100));
        let affected = close(&mut graph, &[4]);

        let stats = reroute_population(&graph, &mut population, &[], &affected, 0);
        assert_eq!(stats, RerouteStats::default());
    }
}
