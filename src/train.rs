use itertools::Itertools;

use crate::graph::Graph;
use crate::network::{Line, LineIdx, StationIdx, TrainIdx};
use crate::path::PathSegment;
use crate::primitives::Time;
use crate::simulation::InitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards the last station of the line.
    Up,
    /// Towards the first station of the line.
    Down,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Position of a train one stop further along `line`, reversing at the termini.
fn advance(line: &Line, pos: usize, direction: Direction) -> (usize, Direction) {
    let last = line.stations.len() - 1;
    match direction {
        Direction::Up if pos >= last => (pos.saturating_sub(1), Direction::Down),
        Direction::Up => (pos + 1, Direction::Up),
        Direction::Down if pos == 0 => (1.min(last), Direction::Up),
        Direction::Down => (pos - 1, Direction::Down),
    }
}

#[derive(Debug, Clone)]
pub struct Train {
    pub id: TrainIdx,
    pub line: LineIdx,
    pub direction: Direction,
    /// `None` until the train reaches its first station.
    pub current_station: Option<StationIdx>,
    pub next_station: StationIdx,
    pub trip_number: u32,
    pub arrival_at_current: Option<Time>,
    pub next_station_arrival: Time,
}

impl Train {
    /// A train that will reach `first_station` at `arrival`, heading in `direction`.
    pub fn new(
        id: TrainIdx,
        line: LineIdx,
        direction: Direction,
        first_station: StationIdx,
        arrival: Time,
    ) -> Self {
        Self {
            id,
            line,
            direction,
            current_station: None,
            next_station: first_station,
            trip_number: 0,
            arrival_at_current: None,
            next_station_arrival: arrival,
        }
    }

    /// Moves the train to its next station. The station after that is derived from the line
    /// order; at a terminus the direction flips and the trip number increases.
    ///
    /// Returns the station the train arrived at. The next arrival time is left to the caller.
    pub fn arrive(&mut self, line: &Line) -> StationIdx {
        let station = self.next_station;
        let pos = line.position_of(station).unwrap_or(0);
        let (next_pos, direction) = advance(line, pos, self.direction);
        if direction != self.direction {
            self.trip_number += 1;
        }
        self.direction = direction;
        self.current_station = Some(station);
        self.arrival_at_current = Some(self.next_station_arrival);
        self.next_station = line.stations[next_pos];
        station
    }

    pub fn is_between(&self, s1: StationIdx, s2: StationIdx) -> bool {
        match self.current_station {
            Some(current) => {
                (current == s1 && self.next_station == s2)
                    || (current == s2 && self.next_station == s1)
            }
            None => false,
        }
    }

    /// The first open station the train will stop at, starting with its next station. The search
    /// follows the line order and turns around at the termini.
    pub fn next_open_station(&self, graph: &Graph) -> Option<StationIdx> {
        self.ride_to_next_open_station(graph)
            .map(|ride| ride.end_station())
    }

    /// The stations the train passes from its next station up to and including the first open
    /// one. `None` if every station of the line is closed or the train would have to pass a
    /// station twice to get there.
    pub fn ride_to_next_open_station(&self, graph: &Graph) -> Option<PathSegment> {
        let line = graph.line(self.line);
        let mut pos = line.position_of(self.next_station)?;
        let mut direction = self.direction;
        let mut ride = PathSegment::single(self.next_station);
        // Each station is seen at most twice: once per direction.
        for _ in 0..(2 * line.stations.len()) {
            let station = line.stations[pos];
            if graph.station(station).is_open() {
                return Some(ride);
            }
            let (next_pos, next_direction) = advance(line, pos, direction);
            let next = line.stations[next_pos];
            if ride.has_station(next) {
                return None;
            }
            let hop = PathSegment::hop(
                station,
                next,
                self.line,
                graph.travel_time(station, next).unwrap_or(0),
            );
            ride = ride.append(&hop)?;
            pos = next_pos;
            direction = next_direction;
        }
        None
    }
}

/// Seconds a train needs to go from one terminus to the other and back, stops included.
pub fn round_trip_time(graph: &Graph, line: &Line, dwell_time: Time) -> Time {
    let one_way: Time = line
        .stations
        .iter()
        .tuple_windows()
        .map(|(&a, &b)| graph.travel_time(a, b).unwrap_or(0) + dwell_time)
        .sum();
    2 * one_way
}

/// Places the trains of every line. Even-numbered trains start at the first station heading up,
/// odd-numbered ones at the last station heading down; each group is spread evenly over the
/// round-trip time, starting at `start_time`.
pub fn create_fleet(
    graph: &Graph,
    start_time: Time,
    dwell_time: Time,
) -> Result<Vec<Train>, InitError> {
    let mut trains = Vec::new();
    for line in graph.lines() {
        if line.train_count == 0 {
            return Err(InitError::NoTrainsOnLine(line.id));
        }
        let round_trip = round_trip_time(graph, line, dwell_time);
        let num_up = (line.train_count + 1) / 2;
        let num_down = line.train_count / 2;
        for k in 0..line.train_count {
            let (direction, first, group_size) = if k % 2 == 0 {
                (Direction::Up, line.first(), num_up)
            } else {
                (Direction::Down, line.last(), num_down)
            };
            let offset = round_trip * (k / 2) as Time / group_size as Time;
            trains.push(Train::new(
                TrainIdx(trains.len() as u32),
                line.id,
                direction,
                first,
                start_time + offset,
            ));
        }
    }
    Ok(trains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::sample::{single_line_network, travel_params};

    fn s(id: u32) -> StationIdx {
        StationIdx(id)
    }

    fn graph(n: usize) -> Graph {
        Graph::create(&single_line_network(n), 100, travel_params()).unwrap()
    }

    #[test]
    fn train_turns_around_at_terminus() {
        let graph = graph(3);
        let line = graph.line(LineIdx(0));
        let mut train = Train::new(TrainIdx(0), LineIdx(0), Direction::Up, s(0), 0);

        assert_eq!(train.arrive(line), s(0));
        assert_eq!(train.next_station, s(1));
        assert_eq!(train.trip_number, 0);

        train.arrive(line);
        assert_eq!(train.arrive(line), s(2));
        assert_eq!(train.direction, Direction::Down);
        assert_eq!(train.next_station, s(1));
        assert_eq!(train.trip_number, 1);

        train.arrive(line);
        train.arrive(line);
        assert_eq!(train.current_station, Some(s(0)));
        assert_eq!(train.direction, Direction::Up);
        assert_eq!(train.trip_number, 2);
    }

    #[test]
    fn down_train_starting_at_last_station() {
        let graph = graph(3);
        let line = graph.line(LineIdx(0));
        let mut train = Train::new(TrainIdx(1), LineIdx(0), Direction::Down, s(2), 0);
        train.arrive(line);
        assert_eq!(train.next_station, s(1));
        assert_eq!(train.trip_number, 0);
    }

    #[test]
    fn next_open_station_skips_closed_and_wraps() {
        let mut graph = graph(4);
        let mut train = Train::new(TrainIdx(0), LineIdx(0), Direction::Up, s(0), 0);
        train.arrive(graph.line(LineIdx(0)));
        assert_eq!(train.next_open_station(&graph), Some(s(1)));

        graph.station_mut(s(1)).close();
        let ride = train.ride_to_next_open_station(&graph).unwrap();
        assert_eq!(ride.stations(), &[s(1), s(2)]);

        graph.station_mut(s(2)).close();
        graph.station_mut(s(3)).close();
        // Turning around at 3 would pass 2 again.
        assert_eq!(train.ride_to_next_open_station(&graph), None);
    }

    #[test]
    fn next_open_station_turns_around_at_closed_terminus() {
        let mut graph = graph(3);
        let line = graph.line(LineIdx(0)).clone();
        let mut train = Train::new(TrainIdx(0), LineIdx(0), Direction::Up, s(0), 0);
        train.arrive(&line);
        train.arrive(&line);
        assert_eq!(train.next_station, s(2));
        graph.station_mut(s(2)).close();
        // Turning around at the closed terminus leads back to 1.
        assert_eq!(train.next_open_station(&graph), Some(s(1)));
    }

    #[test]
    fn fleet_alternates_directions_and_staggers() {
        let mut description = single_line_network(3);
        description.lines[0].train_count = 4;
        let mut four = Graph::create(&description, 100, travel_params()).unwrap();
        four.set_travel_time(s(0), s(1), 100);
        four.set_travel_time(s(1), s(2), 100);
        let line = four.line(LineIdx(0)).clone();
        assert_eq!(round_trip_time(&four, &line, 20), 480);

        let trains = create_fleet(&four, 1000, 20).unwrap();
        assert_eq!(trains.len(), 4);
        assert_eq!(trains[0].direction, Direction::Up);
        assert_eq!(trains[0].next_station, s(0));
        assert_eq!(trains[1].direction, Direction::Down);
        assert_eq!(trains[1].next_station, s(2));
        assert_eq!(
            trains.iter().map(|t| t.next_station_arrival).collect_vec(),
            vec![1000, 1000, 1240, 1240]
        );
        assert!(trains.iter().enumerate().all(|(i, t)| t.id == TrainIdx(i as u32)));

        description.lines[0].train_count = 0;
        let empty = Graph::create(&description, 100, travel_params()).unwrap();
        assert!(matches!(
            create_fleet(&empty, 0, 20),
            Err(InitError::NoTrainsOnLine(LineIdx(0)))
        ));
    }

    #[test]
    fn is_between_both_directions() {
        let graph = graph(3);
        let mut train = Train::new(TrainIdx(0), LineIdx(0), Direction::Up, s(0), 0);
        assert!(!train.is_between(s(0), s(1)));
        train.arrive(graph.line(LineIdx(0)));
        assert!(train.is_between(s(0), s(1)));
        assert!(train.is_between(s(1), s(0)));
        assert!(!train.is_between(s(1), s(2)));
    }
}
