use itertools::Itertools;
use log::{debug, info};
use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator, ParallelIterator,
};

use crate::geometry::{self, Point};
use crate::network::{
    ExtLine, ExtStation, Line, LineIdx, NetworkDescription, Station, StationIdx,
};
use crate::path::PathSegment;
use crate::primitives::{Meters, Time};

#[derive(Debug)]
pub enum BuildGraphError {
    UnknownStation {
        line: LineIdx,
        station: StationIdx,
    },
    LineTooShort {
        line: LineIdx,
    },
    StationRepeatedOnLine {
        line: LineIdx,
        station: StationIdx,
    },
    /// The relaxation produced a path visiting a station twice; the topology cannot be
    /// represented.
    RevisitingPath {
        from: StationIdx,
        to: StationIdx,
        path: PathSegment,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum LookupError {
    SameStation(StationIdx),
    OutOfBounds(StationIdx),
    NoPath { from: StationIdx, to: StationIdx },
}

/// Kinematic limits of the rolling stock.
#[derive(Debug, Clone, Copy)]
pub struct TravelParams {
    pub acceleration: f64,
    pub max_speed: f64,
}

#[derive(Debug, Clone)]
pub struct Graph {
    stations: Vec<Station>,
    lines: Vec<Line>,
    /// paths[i][j]: best known route from i to j, `None` if unreachable.
    paths: Vec<Vec<Option<PathSegment>>>,
    /// travel_times[i][j]: only set for line-adjacent stations.
    travel_times: Vec<Vec<Option<Time>>>,
    delays: Vec<Vec<Time>>,
    is_convex: bool,
}

impl Graph {
    pub fn create(
        description: &NetworkDescription,
        default_capacity: usize,
        params: TravelParams,
    ) -> Result<Self, BuildGraphError> {
        let mut graph = Self::without_paths(description, default_capacity, params)?;
        graph.regenerate()?;
        Ok(graph)
    }

    /// Creates stations, lines and the travel-time matrix. The path matrix is empty until
    /// [`Graph::regenerate`] is called.
    pub fn without_paths(
        description: &NetworkDescription,
        default_capacity: usize,
        params: TravelParams,
    ) -> Result<Self, BuildGraphError> {
        let num_stations = description.stations.len();
        let mut stations = description
            .stations
            .iter()
            .enumerate()
            .map(|(idx, ExtStation { code, name, position })| {
                Station::new(StationIdx(idx as u32), code.clone(), name.clone(), *position)
            })
            .collect_vec();

        let mut lines = Vec::with_capacity(description.lines.len());
        for (idx, ext) in description.lines.iter().enumerate() {
            let line_idx = LineIdx(idx as u32);
            let ExtLine {
                code,
                name,
                stations: line_stations,
                train_count,
                capacity,
            } = ext;
            if line_stations.len() < 2 {
                return Err(BuildGraphError::LineTooShort { line: line_idx });
            }
            if let Some(&station) = line_stations
                .iter()
                .find(|s| s.0 as usize >= num_stations)
            {
                return Err(BuildGraphError::UnknownStation {
                    line: line_idx,
                    station,
                });
            }
            if let Some(&station) = line_stations.iter().duplicates().next() {
                return Err(BuildGraphError::StationRepeatedOnLine {
                    line: line_idx,
                    station,
                });
            }
            for &station in line_stations {
                stations[station.0 as usize].lines.push(line_idx);
            }
            lines.push(Line {
                id: line_idx,
                code: code.clone(),
                name: name.clone(),
                stations: line_stations.clone(),
                train_count: *train_count,
                capacity: capacity.unwrap_or(default_capacity),
            });
        }

        let mut travel_times = vec![vec![None; num_stations]; num_stations];
        for line in &lines {
            for (&a, &b) in line.stations.iter().tuple_windows() {
                let d = geometry::distance(
                    stations[a.0 as usize].position,
                    stations[b.0 as usize].position,
                );
                let t = geometry::travel_time(d, params.acceleration, params.max_speed);
                travel_times[a.0 as usize][b.0 as usize] = Some(t);
                travel_times[b.0 as usize][a.0 as usize] = Some(t);
            }
        }

        Ok(Self {
            stations,
            lines,
            paths: vec![vec![None; num_stations]; num_stations],
            travel_times,
            delays: vec![vec![0; num_stations]; num_stations],
            is_convex: false,
        })
    }

    /// Recomputes the path matrix from scratch, honouring the current open/closed status of
    /// every station.
    pub fn regenerate(&mut self) -> Result<(), BuildGraphError> {
        let num_stations = self.stations.len();
        debug!("Regenerating paths for {} stations", num_stations);

        let hops: Vec<Vec<(StationIdx, PathSegment)>> = self
            .stations()
            .map(|s| {
                self.open_neighbors(s)
                    .into_iter()
                    .map(|(n, line)| {
                        let t = self.travel_time(s, n).unwrap_or(0);
                        (n, PathSegment::hop(s, n, line, t))
                    })
                    .collect()
            })
            .collect();

        let paths: Vec<Vec<Option<PathSegment>>> = (0..num_stations)
            .into_par_iter()
            .map(|source| relax_row(StationIdx(source as u32), &hops, num_stations))
            .collect();

        let invalid = paths
            .par_iter()
            .enumerate()
            .find_map_any(|(from, row)| {
                row.iter().enumerate().find_map(|(to, path)| match path {
                    Some(path) if !path.check_validity() => Some((from, to, path.clone())),
                    _ => None,
                })
            });
        if let Some((from, to, path)) = invalid {
            return Err(BuildGraphError::RevisitingPath {
                from: StationIdx(from as u32),
                to: StationIdx(to as u32),
                path,
            });
        }

        self.is_convex = paths.iter().enumerate().all(|(from, row)| {
            row.iter()
                .enumerate()
                .all(|(to, path)| from == to || path.is_some())
        });
        self.paths = paths;
        Ok(())
    }

    /// Line-adjacent open neighbours of an open station. Each neighbour is listed once, with the
    /// first line connecting it.
    fn open_neighbors(&self, station: StationIdx) -> Vec<(StationIdx, LineIdx)> {
        let mut neighbors: Vec<(StationIdx, LineIdx)> = Vec::new();
        if self.station(station).is_closed() {
            return neighbors;
        }
        for &line_idx in &self.station(station).lines {
            for neighbor in self.line(line_idx).neighbors(station) {
                if self.station(neighbor).is_open()
                    && !neighbors.iter().any(|&(n, _)| n == neighbor)
                {
                    neighbors.push((neighbor, line_idx));
                }
            }
        }
        neighbors
    }

    pub fn station(&self, station: StationIdx) -> &Station {
        &self.stations[station.0 as usize]
    }

    pub(crate) fn station_mut(&mut self, station: StationIdx) -> &mut Station {
        &mut self.stations[station.0 as usize]
    }

    pub fn stations(&self) -> impl Iterator<Item = StationIdx> {
        (0_u32..(self.stations.len() as u32)).map(StationIdx)
    }

    pub fn open_stations(&self) -> impl Iterator<Item = StationIdx> + '_ {
        self.stations().filter(|&s| self.station(s).is_open())
    }

    pub fn num_stations(&self) -> usize {
        self.stations.len()
    }

    pub fn contains(&self, station: StationIdx) -> bool {
        (station.0 as usize) < self.stations.len()
    }

    pub fn line(&self, line: LineIdx) -> &Line {
        &self.lines[line.0 as usize]
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter()
    }

    pub fn is_convex(&self) -> bool {
        self.is_convex
    }

    pub fn travel_time(&self, s1: StationIdx, s2: StationIdx) -> Option<Time> {
        self.travel_times[s1.0 as usize][s2.0 as usize]
    }

    /// Overrides the nominal travel time between two adjacent stations. Cached paths keep their
    /// hop times until the next regeneration.
    pub fn set_travel_time(&mut self, s1: StationIdx, s2: StationIdx, seconds: Time) {
        self.travel_times[s1.0 as usize][s2.0 as usize] = Some(seconds);
        self.travel_times[s2.0 as usize][s1.0 as usize] = Some(seconds);
    }

    pub fn delay(&self, s1: StationIdx, s2: StationIdx) -> Time {
        self.delays[s1.0 as usize][s2.0 as usize]
    }

    /// Travel time including the delay currently in effect.
    pub fn segment_time(&self, s1: StationIdx, s2: StationIdx) -> Time {
        self.travel_time(s1, s2).unwrap_or(0) + self.delay(s1, s2)
    }

    pub fn add_delay(
        &mut self,
        s1: StationIdx,
        s2: StationIdx,
        seconds: Time,
    ) -> Result<(), LookupError> {
        self.check_bounds(s1)?;
        self.check_bounds(s2)?;
        self.delays[s1.0 as usize][s2.0 as usize] = seconds;
        self.delays[s2.0 as usize][s1.0 as usize] = seconds;
        Ok(())
    }

    fn check_bounds(&self, station: StationIdx) -> Result<(), LookupError> {
        if self.contains(station) {
            Ok(())
        } else {
            Err(LookupError::OutOfBounds(station))
        }
    }

    pub fn find_path(&self, s1: StationIdx, s2: StationIdx) -> Result<&PathSegment, LookupError> {
        self.check_bounds(s1)?;
        self.check_bounds(s2)?;
        if s1 == s2 {
            return Err(LookupError::SameStation(s1));
        }
        self.paths[s1.0 as usize][s2.0 as usize]
            .as_ref()
            .ok_or(LookupError::NoPath { from: s1, to: s2 })
    }

    pub fn station_distance(&self, s1: StationIdx, s2: StationIdx) -> Meters {
        geometry::distance(self.station(s1).position, self.station(s2).position)
    }

    pub fn find_nearest_open_station(&self, point: Point) -> Option<StationIdx> {
        self.open_stations()
            .map(|s| (s, geometry::distance(point, self.station(s).position)))
            .sorted_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)
            .next()
    }

    /// A path from `start` to the open station that gets closest to `end` while being closer to
    /// it than `start` is.
    pub fn find_repair_path(&self, start: StationIdx, end: StationIdx) -> Option<PathSegment> {
        if !self.contains(start) || !self.contains(end) {
            return None;
        }
        let start_distance = self.station_distance(start, end);
        self.open_stations()
            .filter(|&m| m != start)
            .filter(|&m| self.paths[start.0 as usize][m.0 as usize].is_some())
            .map(|m| (m, self.station_distance(m, end)))
            .filter(|&(_, d)| d < start_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .and_then(|(m, _)| self.paths[start.0 as usize][m.0 as usize].clone())
    }

    /// The path matrix lookup, falling back to a repair path.
    pub fn path_or_repair(&self, start: StationIdx, end: StationIdx) -> Option<PathSegment> {
        match self.find_path(start, end) {
            Ok(path) => Some(path.clone()),
            Err(LookupError::SameStation(_)) => Some(PathSegment::single(start)),
            Err(_) => self.find_repair_path(start, end),
        }
    }

    pub fn common_line(&self, s1: StationIdx, s2: StationIdx) -> Option<LineIdx> {
        self.station(s1)
            .lines
            .iter()
            .copied()
            .find(|&line| self.line(line).position_of(s2).is_some())
    }

    /// Stations between `s1` and `s2` (inclusive) on the first line serving both.
    pub fn stations_between(&self, s1: StationIdx, s2: StationIdx) -> Option<Vec<StationIdx>> {
        let line = self.line(self.common_line(s1, s2)?);
        let p1 = line.position_of(s1)?;
        let p2 = line.position_of(s2)?;
        let (from, to) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
        Some(line.stations[from..=to].to_vec())
    }

    pub fn are_adjacent(&self, s1: StationIdx, s2: StationIdx) -> bool {
        self.station(s1)
            .lines
            .iter()
            .any(|&line| self.line(line).are_adjacent(s1, s2))
    }

    pub fn num_paths(&self) -> usize {
        self.paths.iter().flatten().filter(|p| p.is_some()).count()
    }

    pub fn log_summary(&self) {
        info!(
            "Graph: {} stations, {} lines, {} paths, convex: {}",
            self.num_stations(),
            self.lines.len(),
            self.num_paths(),
            self.is_convex
        );
    }
}

/// Relaxes all paths starting at `source` until no path changes.
///
/// A proposal only replaces an existing path if it is shorter by at least two stations.
fn relax_row(
    source: StationIdx,
    hops: &[Vec<(StationIdx, PathSegment)>],
    num_stations: usize,
) -> Vec<Option<PathSegment>> {
    let mut row: Vec<Option<PathSegment>> = vec![None; num_stations];
    for (neighbor, hop) in &hops[source.0 as usize] {
        row[neighbor.0 as usize] = Some(hop.clone());
    }

    loop {
        let mut changed = false;
        for middle in 0..num_stations {
            let Some(to_middle) = row[middle].clone() else {
                continue;
            };
            for (end, hop) in &hops[middle] {
                if *end == source {
                    continue;
                }
                let Some(proposal) = to_middle.append(hop) else {
                    continue;
                };
                let accept = match &row[end.0 as usize] {
                    None => true,
                    Some(current) => current.len() >= proposal.len() + 2,
                };
                if accept {
                    row[end.0 as usize] = Some(proposal);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    row
}
