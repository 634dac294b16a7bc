use std::time::{Duration, Instant};

use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Disruptions,
    Departures,
    Trains,
}

impl Phase {
    const ALL: [Phase; 3] = [Phase::Disruptions, Phase::Departures, Phase::Trains];
}

/// Wall-clock time spent in each phase of a tick, summed over the whole run.
#[derive(Debug, Default, Clone)]
pub struct PhaseTimer {
    durations: [Duration; 3],
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure<T>(&mut self, phase: Phase, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.durations[phase as usize] += start.elapsed();
        result
    }

    pub fn elapsed(&self, phase: Phase) -> Duration {
        self.durations[phase as usize]
    }

    pub fn total(&self) -> Duration {
        self.durations.iter().sum()
    }

    pub fn log_summary(&self) {
        for phase in Phase::ALL {
            info!("{:?}: {:.3}s", phase, self.elapsed(phase).as_secs_f64());
        }
        info!("Total: {:.3}s", self.total().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_summed_separately() {
        let mut timer = PhaseTimer::new();
        let value = timer.measure(Phase::Trains, || {
            std::thread::sleep(Duration::from_millis(2));
            7
        });
        assert_eq!(value, 7);
        assert!(timer.elapsed(Phase::Trains) >= Duration::from_millis(2));
        assert_eq!(timer.elapsed(Phase::Disruptions), Duration::ZERO);
        assert_eq!(timer.total(), timer.elapsed(Phase::Trains));
    }
}
