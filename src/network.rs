use std::fmt::Debug;

use crate::geometry::Point;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationIdx(pub u32);
impl Debug for StationIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("s#{}", self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineIdx(pub u32);
impl Debug for LineIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("l#{}", self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrainIdx(pub u32);
impl Debug for TrainIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("t#{}", self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Station {
    pub id: StationIdx,
    pub code: String,
    pub name: String,
    pub position: Point,
    pub lines: Vec<LineIdx>,
    status: StationStatus,
    /// Number of closure events currently in effect.
    closures: u32,
}

impl Station {
    pub fn new(id: StationIdx, code: String, name: String, position: Point) -> Self {
        Self {
            id,
            code,
            name,
            position,
            lines: Vec::new(),
            status: StationStatus::Open,
            closures: 0,
        }
    }

    pub fn status(&self) -> StationStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == StationStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == StationStatus::Closed
    }

    /// Returns true if the status changed.
    pub(crate) fn close(&mut self) -> bool {
        self.closures += 1;
        let changed = self.status == StationStatus::Open;
        self.status = StationStatus::Closed;
        changed
    }

    /// Returns true if the status changed. The station stays closed while other
    /// closures are still in effect.
    pub(crate) fn reopen(&mut self) -> bool {
        self.closures = self.closures.saturating_sub(1);
        if self.closures == 0 && self.status == StationStatus::Closed {
            self.status = StationStatus::Open;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct Line {
    pub id: LineIdx,
    pub code: String,
    pub name: String,
    pub stations: Vec<StationIdx>,
    pub train_count: usize,
    pub capacity: usize,
}

impl Line {
    pub fn position_of(&self, station: StationIdx) -> Option<usize> {
        self.stations.iter().position(|&s| s == station)
    }

    pub fn first(&self) -> StationIdx {
        self.stations[0]
    }

    pub fn last(&self) -> StationIdx {
        self.stations[self.stations.len() - 1]
    }

    /// The one or two stations next to `station` in line order.
    pub fn neighbors(&self, station: StationIdx) -> impl Iterator<Item = StationIdx> + '_ {
        let pos = self.position_of(station);
        let prev = pos.and_then(|p| p.checked_sub(1)).map(|p| self.stations[p]);
        let next = pos.and_then(|p| self.stations.get(p + 1).copied());
        prev.into_iter().chain(next)
    }

    pub fn are_adjacent(&self, s1: StationIdx, s2: StationIdx) -> bool {
        match (self.position_of(s1), self.position_of(s2)) {
            (Some(p1), Some(p2)) => p1.abs_diff(p2) == 1,
            _ => false,
        }
    }
}

/// A station as handed over by the input layer, already renumbered.
#[derive(Debug, Clone)]
pub struct ExtStation {
    pub code: String,
    pub name: String,
    pub position: Point,
}

#[derive(Debug, Clone)]
pub struct ExtLine {
    pub code: String,
    pub name: String,
    pub stations: Vec<StationIdx>,
    pub train_count: usize,
    /// Falls back to the configured train capacity.
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkDescription {
    pub stations: Vec<ExtStation>,
    pub lines: Vec<ExtLine>,
}
