use std::fmt::{Debug, Write};

use itertools::Itertools;

use crate::col::HashSet;
use crate::network::{LineIdx, StationIdx};
use crate::primitives::Time;

/// A route through the network: the stations visited in order, the line taken for each hop and
/// the nominal travel time of each hop.
///
/// `lines[i]` and `hop_times[i]` belong to the hop from `stations[i]` to `stations[i + 1]`.
/// A segment with a single station is degenerate and means that no travel is needed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    stations: Vec<StationIdx>,
    lines: Vec<LineIdx>,
    hop_times: Vec<Time>,
}

impl Debug for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = String::new();
        write!(s, "[{:?}", self.stations[0])?;
        for (line, station) in self.lines.iter().zip(self.stations.iter().skip(1)) {
            write!(s, " -{:?}-> {:?}", line, station)?;
        }
        s.push(']');
        f.write_str(&s)
    }
}

impl PathSegment {
    pub fn single(station: StationIdx) -> Self {
        Self {
            stations: vec![station],
            lines: vec![],
            hop_times: vec![],
        }
    }

    pub fn hop(from: StationIdx, to: StationIdx, line: LineIdx, travel_time: Time) -> Self {
        Self {
            stations: vec![from, to],
            lines: vec![line],
            hop_times: vec![travel_time],
        }
    }

    pub fn from_parts(
        stations: Vec<StationIdx>,
        lines: Vec<LineIdx>,
        hop_times: Vec<Time>,
    ) -> Option<Self> {
        if stations.is_empty()
            || lines.len() + 1 != stations.len()
            || hop_times.len() != lines.len()
        {
            return None;
        }
        Some(Self {
            stations,
            lines,
            hop_times,
        })
    }

    pub fn stations(&self) -> &[StationIdx] {
        &self.stations
    }

    pub fn lines(&self) -> &[LineIdx] {
        &self.lines
    }

    /// Number of stations.
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_degenerate(&self) -> bool {
        self.stations.len() == 1
    }

    pub fn start_station(&self) -> StationIdx {
        self.stations[0]
    }

    pub fn end_station(&self) -> StationIdx {
        self.stations[self.stations.len() - 1]
    }

    pub fn has_station(&self, station: StationIdx) -> bool {
        self.stations.contains(&station)
    }

    pub fn position_of(&self, station: StationIdx) -> Option<usize> {
        self.stations.iter().position(|&s| s == station)
    }

    pub fn duration(&self) -> Time {
        self.hop_times.iter().sum()
    }

    /// The line to take at `station` and the station it leads to.
    pub fn next_hop(&self, station: StationIdx) -> Option<(LineIdx, StationIdx)> {
        let pos = self.position_of(station)?;
        Some((*self.lines.get(pos)?, self.stations[pos + 1]))
    }

    pub fn touches(&self, stations: &HashSet<StationIdx>) -> bool {
        self.stations.iter().any(|s| stations.contains(s))
    }

    /// True iff no station is visited twice.
    pub fn check_validity(&self) -> bool {
        self.lines.len() + 1 == self.stations.len()
            && self.hop_times.len() == self.lines.len()
            && self.stations.iter().all_unique()
    }

    /// Concatenates `self` and `other`; the shared joint station appears once.
    ///
    /// Returns `None` if `other` does not start where `self` ends, since no line is known for
    /// the gap between them.
    pub fn append(&self, other: &PathSegment) -> Option<PathSegment> {
        if self.end_station() != other.start_station() {
            return None;
        }
        let mut stations = self.stations.clone();
        stations.extend_from_slice(&other.stations[1..]);
        let mut lines = self.lines.clone();
        lines.extend_from_slice(&other.lines);
        let mut hop_times = self.hop_times.clone();
        hop_times.extend_from_slice(&other.hop_times);
        Some(PathSegment {
            stations,
            lines,
            hop_times,
        })
    }

    /// The contiguous part between `start` and `end` (both inclusive).
    pub fn segment(&self, start: StationIdx, end: StationIdx) -> Option<PathSegment> {
        let from = self.position_of(start)?;
        let to = self.position_of(end)?;
        if from > to {
            return None;
        }
        Some(PathSegment {
            stations: self.stations[from..=to].to_vec(),
            lines: self.lines[from..to].to_vec(),
            hop_times: self.hop_times[from..to].to_vec(),
        })
    }

    pub fn remaining_from(&self, station: StationIdx) -> Option<PathSegment> {
        self.segment(station, self.end_station())
    }

    /// Keeps `self` up to the start of `replacement` and continues with `replacement` from there.
    /// If `replacement` starts outside of `self`, the two are appended.
    pub fn reroute(&self, replacement: &PathSegment) -> Option<PathSegment> {
        match self.position_of(replacement.start_station()) {
            Some(_) => self
                .segment(self.start_station(), replacement.start_station())?
                .append(replacement),
            None => self.append(replacement),
        }
    }

    /// The prefix ending right before the first station contained in `stations`, or `None` if the
    /// segment starts in `stations`.
    pub fn truncate_before(&self, stations: &HashSet<StationIdx>) -> Option<PathSegment> {
        match self.stations.iter().position(|s| stations.contains(s)) {
            Some(0) => None,
            Some(pos) => self.segment(self.start_station(), self.stations[pos - 1]),
            None => Some(self.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::col::set_from;

    fn s(id: u32) -> StationIdx {
        StationIdx(id)
    }

    fn path(stations: &[u32], line: u32) -> PathSegment {
        let stations = stations.iter().map(|&id| s(id)).collect_vec();
        let hops = stations.len() - 1;
        PathSegment::from_parts(stations, vec![LineIdx(line); hops], vec![60; hops]).unwrap()
    }

    #[test]
    fn append_elides_joint() {
        let a = path(&[0, 1, 2], 0);
        let b = path(&[2, 3], 1);
        let c = a.append(&b).unwrap();
        assert_eq!(c.stations(), &[s(0), s(1), s(2), s(3)]);
        assert_eq!(c.lines(), &[LineIdx(0), LineIdx(0), LineIdx(1)]);
        assert_eq!(c.duration(), a.duration() + b.duration());
        assert!(c.check_validity());
    }

    #[test]
    fn append_rejects_gaps() {
        assert!(path(&[0, 1], 0).append(&path(&[2, 3], 0)).is_none());
    }

    #[test]
    fn append_degenerate_is_identity() {
        let a = path(&[0, 1, 2], 0);
        assert_eq!(a.append(&PathSegment::single(s(2))).unwrap(), a);
        assert_eq!(PathSegment::single(s(0)).append(&a).unwrap(), a);
    }

    #[test]
    fn segment_extracts_sub_path() {
        let p = path(&[0, 1, 2, 3, 4], 0);
        let seg = p.segment(s(1), s(3)).unwrap();
        assert_eq!(seg.stations(), &[s(1), s(2), s(3)]);
        assert_eq!(seg.lines().len(), 2);
        assert_eq!(seg.duration(), 120);
        assert!(p.segment(s(3), s(1)).is_none());
        assert!(p.segment(s(1), s(9)).is_none());
        assert!(p.segment(s(2), s(2)).unwrap().is_degenerate());
    }

    #[test]
    fn reroute_keeps_prefix() {
        let original = path(&[0, 1, 2, 3], 0);
        let replacement = path(&[1, 5, 3], 1);
        let rerouted = original.reroute(&replacement).unwrap();
        assert_eq!(rerouted.stations(), &[s(0), s(1), s(5), s(3)]);
        assert_eq!(rerouted.lines(), &[LineIdx(0), LineIdx(1), LineIdx(1)]);
    }

    #[test]
    fn reroute_from_end_extends() {
        let original = path(&[0, 1], 0);
        let replacement = path(&[1, 2], 1);
        assert_eq!(
            original.reroute(&replacement),
            original.append(&replacement)
        );
        assert!(original.reroute(&path(&[7, 8], 1)).is_none());
    }

    #[test]
    fn validity_detects_revisits() {
        let p = PathSegment::from_parts(
            vec![s(0), s(1), s(0)],
            vec![LineIdx(0), LineIdx(0)],
            vec![1, 1],
        )
        .unwrap();
        assert!(!p.check_validity());
    }

    #[test]
    fn queries() {
        let p = path(&[4, 2, 7], 3);
        assert_eq!(p.start_station(), s(4));
        assert_eq!(p.end_station(), s(7));
        assert_eq!(p.position_of(s(7)), Some(2));
        assert!(p.has_station(s(2)));
        assert!(!p.has_station(s(3)));
        assert_eq!(p.next_hop(s(2)), Some((LineIdx(3), s(7))));
        assert_eq!(p.next_hop(s(7)), None);
        assert!(p.touches(&set_from([s(9), s(7)])));
    }

    #[test]
    fn truncate_before_closed_station() {
        let p = path(&[0, 1, 2, 3], 0);
        assert_eq!(
            p.truncate_before(&set_from([s(2)])).unwrap().stations(),
            &[s(0), s(1)]
        );
        assert!(p.truncate_before(&set_from([s(0)])).is_none());
        assert_eq!(p.truncate_before(&set_from([s(9)])).unwrap(), p);
    }

    #[test]
    fn from_parts_checks_lengths() {
        assert!(PathSegment::from_parts(vec![], vec![], vec![]).is_none());
        assert!(PathSegment::from_parts(vec![s(0), s(1)], vec![], vec![]).is_none());
    }
}
