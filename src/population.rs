use std::sync::{Mutex, MutexGuard, PoisonError};

use itertools::Itertools;

use crate::col::{map_new, HashMap};
use crate::network::{StationIdx, TrainIdx};
use crate::passenger::{Passenger, PassengerId};
use crate::primitives::Time;

pub type Passengers = HashMap<PassengerId, Passenger>;

/// Passengers that are neither waiting in a station nor riding a train: before their next trip,
/// walking, or done for the day.
#[derive(Debug, Default)]
pub struct Outside {
    passengers: Passengers,
    /// (next departure, passenger) for every passenger with a next trip, ascending.
    by_departure: Vec<(Time, PassengerId)>,
}

impl Outside {
    pub fn insert(&mut self, passenger: Passenger) {
        if let Some(departure) = passenger.next_departure() {
            let key = (departure, passenger.id);
            let pos = self.by_departure.partition_point(|&it| it <= key);
            self.by_departure.insert(pos, key);
        }
        self.passengers.insert(passenger.id, passenger);
    }

    /// Removes and returns every passenger whose next trip departs at or before `time`.
    pub fn pop_departed(&mut self, time: Time) -> Vec<Passenger> {
        let count = self.by_departure.partition_point(|&(t, _)| t <= time);
        self.by_departure
            .drain(..count)
            .filter_map(|(_, id)| self.passengers.remove(&id))
            .collect()
    }

    /// Rebuilds the departure index after next trips were changed in place.
    pub fn resort(&mut self) {
        self.by_departure = self
            .passengers
            .values()
            .filter_map(|p| p.next_departure().map(|d| (d, p.id)))
            .sorted_unstable()
            .collect();
    }

    pub fn is_sorted(&self) -> bool {
        self.by_departure.windows(2).all(|w| w[0] <= w[1])
    }

    pub fn get(&self, id: PassengerId) -> Option<&Passenger> {
        self.passengers.get(&id)
    }

    pub(crate) fn passengers_mut(&mut self) -> impl Iterator<Item = &mut Passenger> {
        self.passengers.values_mut()
    }

    pub fn passengers(&self) -> impl Iterator<Item = &Passenger> {
        self.passengers.values()
    }

    pub fn departures(&self) -> &[(Time, PassengerId)] {
        &self.by_departure
    }

    pub fn len(&self) -> usize {
        self.passengers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passengers.is_empty()
    }
}

/// Every passenger is in exactly one of: outside, waiting in a station, riding a train.
///
/// Station and train sets sit behind their own mutex so that the trains of one batch can
/// exchange passengers concurrently. Two trains calling at the same station are serialized by
/// that station's lock.
#[derive(Debug)]
pub struct Population {
    outside: Outside,
    in_station: Vec<Mutex<Passengers>>,
    in_trains: Vec<Mutex<Passengers>>,
    next_id: u32,
}

fn get_mut(mutex: &mut Mutex<Passengers>) -> &mut Passengers {
    mutex.get_mut().unwrap_or_else(PoisonError::into_inner)
}

impl Population {
    pub fn new(num_stations: usize, num_trains: usize) -> Self {
        Self {
            outside: Outside::default(),
            in_station: (0..num_stations).map(|_| Mutex::new(map_new())).collect(),
            in_trains: (0..num_trains).map(|_| Mutex::new(map_new())).collect(),
            next_id: 0,
        }
    }

    pub fn next_passenger_id(&mut self) -> PassengerId {
        let id = PassengerId(self.next_id);
        self.next_id += 1;
        id
    }

    fn track_id(&mut self, id: PassengerId) {
        self.next_id = self.next_id.max(id.0 + 1);
    }

    pub fn add_outside(&mut self, passenger: Passenger) {
        self.track_id(passenger.id);
        self.outside.insert(passenger);
    }

    pub fn add_in_station(&mut self, station: StationIdx, passenger: Passenger) {
        self.track_id(passenger.id);
        self.station_mut(station).insert(passenger.id, passenger);
    }

    pub fn outside(&self) -> &Outside {
        &self.outside
    }

    pub(crate) fn outside_mut(&mut self) -> &mut Outside {
        &mut self.outside
    }

    pub(crate) fn station_mut(&mut self, station: StationIdx) -> &mut Passengers {
        get_mut(&mut self.in_station[station.0 as usize])
    }

    pub(crate) fn train_mut(&mut self, train: TrainIdx) -> &mut Passengers {
        get_mut(&mut self.in_trains[train.0 as usize])
    }

    pub(crate) fn lock_station(&self, station: StationIdx) -> MutexGuard<'_, Passengers> {
        self.in_station[station.0 as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_train(&self, train: TrainIdx) -> MutexGuard<'_, Passengers> {
        self.in_trains[train.0 as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn num_in_station(&self, station: StationIdx) -> usize {
        self.lock_station(station).len()
    }

    pub fn num_in_train(&self, train: TrainIdx) -> usize {
        self.lock_train(train).len()
    }

    pub fn waiting_stations(&self) -> impl Iterator<Item = StationIdx> {
        (0..self.in_station.len() as u32).map(StationIdx)
    }

    pub fn trains(&self) -> impl Iterator<Item = TrainIdx> {
        (0..self.in_trains.len() as u32).map(TrainIdx)
    }

    /// Moves passengers whose next trip has departed by `time` out of the outside set and
    /// returns them; the caller places them.
    pub(crate) fn take_departed(&mut self, time: Time) -> Vec<Passenger> {
        self.outside.pop_departed(time)
    }

    /// Pushes a waiting passenger out of the station.
    pub fn evict(&mut self, station: StationIdx, id: PassengerId) -> bool {
        match self.station_mut(station).remove(&id) {
            Some(mut passenger) => {
                passenger.leave_current_trip();
                self.outside.insert(passenger);
                true
            }
            None => false,
        }
    }

    pub fn len(&mut self) -> usize {
        self.outside.len()
            + self.in_station.iter_mut().map(|m| get_mut(m).len()).sum::<usize>()
            + self.in_trains.iter_mut().map(|m| get_mut(m).len()).sum::<usize>()
    }

    pub fn all_passengers(&mut self) -> impl Iterator<Item = &Passenger> {
        self.outside.passengers.values().chain(
            self.in_station
                .iter_mut()
                .chain(self.in_trains.iter_mut())
                .flat_map(|m| get_mut(m).values()),
        )
    }

    /// True iff no passenger is in two places at once and the outside index is sorted and
    /// consistent with the outside set.
    pub fn check_partition(&mut self) -> bool {
        let total = self.len();
        let unique = self.all_passengers().map(|p| p.id).unique().count();
        let indexed_ok = self
            .outside
            .by_departure
            .iter()
            .all(|(t, id)| self.outside.get(*id).and_then(|p| p.next_departure()) == Some(*t));
        let indexed_count = self
            .outside
            .passengers()
            .filter(|p| p.next_departure().is_some())
            .count();
        total == unique
            && indexed_ok
            && indexed_count == self.outside.by_departure.len()
            && self.outside.is_sorted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LineIdx;
    use crate::passenger::{PassengerKind, Trip};
    use crate::path::PathSegment;

    fn passenger(id: u32, departure: Time) -> Passenger {
        let path = PathSegment::hop(StationIdx(0), StationIdx(1), LineIdx(0), 60);
        Passenger::new(
            PassengerId(id),
            PassengerKind::Occasional,
            vec![Trip::new(departure, path)],
        )
    }

    #[test]
    fn outside_stays_sorted() {
        let mut outside = Outside::default();
        for (id, departure) in [(0, 50), (1, 10), (2, 30), (3, 10), (4, 70)] {
            outside.insert(passenger(id, departure));
            assert!(outside.is_sorted());
        }
        let departed = outside.pop_departed(30);
        assert_eq!(
            departed.iter().map(|p| p.id.0).collect_vec(),
            vec![1, 3, 2]
        );
        assert!(outside.is_sorted());
        assert_eq!(outside.len(), 2);
        assert_eq!(outside.departures().first().map(|d| d.0), Some(50));
    }

    #[test]
    fn passengers_without_next_trip_are_not_indexed() {
        let mut outside = Outside::default();
        let mut done = passenger(0, 10);
        done.start_next_trip();
        done.complete_current_trip(100);
        outside.insert(done);
        assert_eq!(outside.len(), 1);
        assert!(outside.departures().is_empty());
        assert!(outside.pop_departed(Time::MAX).is_empty());
    }

    #[test]
    fn resort_after_in_place_changes() {
        let mut outside = Outside::default();
        outside.insert(passenger(0, 10));
        outside.insert(passenger(1, 20));
        for p in outside.passengers_mut() {
            if p.id == PassengerId(0) {
                p.cancel_active_trip();
            }
        }
        outside.resort();
        assert_eq!(outside.departures(), &[(20, PassengerId(1))]);
    }

    #[test]
    fn ids_continue_after_added_passengers() {
        let mut population = Population::new(1, 0);
        population.add_outside(passenger(4, 10));
        assert_eq!(population.next_passenger_id(), PassengerId(5));
        assert_eq!(population.next_passenger_id(), PassengerId(6));
    }

    #[test]
    fn partition_and_eviction() {
        let mut population = Population::new(2, 1);
        population.add_outside(passenger(0, 10));
        let mut waiting = passenger(1, 0);
        waiting.start_next_trip();
        population.add_in_station(StationIdx(0), waiting);
        population.train_mut(TrainIdx(0)).insert(PassengerId(2), passenger(2, 0));
        assert_eq!(population.len(), 3);
        assert!(population.check_partition());

        assert!(population.evict(StationIdx(0), PassengerId(1)));
        assert!(!population.evict(StationIdx(0), PassengerId(1)));
        assert_eq!(population.num_in_station(StationIdx(0)), 0);
        assert_eq!(population.outside().len(), 2);
        assert!(population.check_partition());

        // The same passenger in two places breaks the partition.
        population.add_in_station(StationIdx(1), passenger(0, 10));
        assert!(!population.check_partition());
    }
}
