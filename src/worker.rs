use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crate::board::StateBoard;
use crate::counter::LoadPattern;
use crate::signal::StopSignal;

/// Most workers one run may start.
pub const MAX_WORKERS: usize = 1 << 20;

/// Position of a worker: which group it belongs to and its index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub group: usize,
    pub index: usize,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stopped,
    Faulted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: WorkerId,
    pub steps: u64,
    pub outcome: Outcome,
}

/// One unit of synthetic CPU load.
pub struct CounterWorker<P> {
    id: WorkerId,
    pattern: P,
    stop: StopSignal,
    pause: Duration,
    board: Option<StateBoard>,
}

impl<P: LoadPattern> CounterWorker<P> {
    pub fn new(id: WorkerId, pattern: P, stop: StopSignal, pause: Duration) -> Self {
        Self {
            id,
            pattern,
            stop,
            pause,
            board: None,
        }
    }

    /// Publish the state on every step.
    pub fn with_board(mut self, board: StateBoard) -> Self {
        self.board = Some(board);
        self
    }

    /// Counts until the stop signal is raised. A panic inside the loop ends
    /// this worker only and is reported as [`Outcome::Faulted`].
    pub fn run(mut self) -> WorkerReport {
        let mut steps = 0;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.spin(&mut steps)));

        let outcome = match result {
            Ok(()) => Outcome::Stopped,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!(worker = %self.id, steps, "worker faulted: {msg}");
                Outcome::Faulted(msg)
            }
        };

        WorkerReport {
            id: self.id,
            steps,
            outcome,
        }
    }

    fn spin(&mut self, steps: &mut u64) {
        if self.stop.is_set() {
            return;
        }
        let mut state = self.pattern.start();

        loop {
            if self.stop.is_set() {
                return;
            }
            if let Some(board) = &self.board {
                board.publish(self.id, state);
            }
            state = self.pattern.advance(state);
            *steps += 1;
            if self.stop.is_set() {
                return;
            }

            if self.pause.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.pause);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::testing::{stopping_after, Faulty};
    use crate::counter::{MockLoadPattern, UpDownSpec};
    use std::time::Instant;

    const ID: WorkerId = WorkerId { group: 0, index: 0 };

    #[test]
    fn pre_set_signal_means_zero_steps() {
        let stop = StopSignal::new();
        stop.set();
        let mut pattern = MockLoadPattern::new();
        pattern.expect_start().never();
        pattern.expect_advance().never();

        let report = CounterWorker::new(ID, pattern, stop, Duration::ZERO).run();
        assert_eq!(report.steps, 0);
        assert_eq!(report.outcome, Outcome::Stopped);
    }

    #[test]
    fn signal_is_checked_right_after_a_step() {
        let stop = StopSignal::new();
        let pattern = stopping_after(1, stop.clone());
        let started = Instant::now();
        let report = CounterWorker::new(ID, pattern, stop, Duration::from_secs(60)).run();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.steps, 1);
        assert_eq!(report.outcome, Outcome::Stopped);
    }

    #[test]
    fn every_step_is_counted() {
        let stop = StopSignal::new();
        let pattern = stopping_after(5, stop.clone());
        let report = CounterWorker::new(ID, pattern, stop, Duration::ZERO).run();
        assert_eq!(report.steps, 5);
    }

    #[test]
    fn panic_is_reported_not_propagated() {
        let pattern = Faulty { after: 2 };
        let report = CounterWorker::new(ID, pattern, StopSignal::new(), Duration::ZERO).run();
        assert_eq!(report.steps, 2);
        assert_eq!(report.outcome, Outcome::Faulted("worker fault".into()));
    }

    #[test]
    fn publishes_to_the_board() {
        let stop = StopSignal::new();
        let board = StateBoard::new(1, 1).unwrap();
        let pattern = stopping_after(1, stop.clone());
        CounterWorker::new(ID, pattern, stop, Duration::ZERO)
            .with_board(board.clone())
            .run();
        assert!(board.get(ID).is_some());
    }

    #[test]
    fn stops_within_one_pause() {
        let stop = StopSignal::new();
        let pattern = UpDownSpec {
            ceiling: 100,
            ..UpDownSpec::default()
        }
        .build_seeded(5);
        let worker = CounterWorker::new(ID, pattern, stop.clone(), Duration::from_millis(5));
        let handle = thread::spawn(move || worker.run());

        thread::sleep(Duration::from_millis(20));
        let raised = Instant::now();
        stop.set();
        let report = handle.join().unwrap();

        assert!(raised.elapsed() < Duration::from_millis(500));
        assert!(report.steps > 0);
        assert_eq!(report.outcome, Outcome::Stopped);
    }
}
