use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::board::StateBoard;
use crate::counter::LoadPattern;
use crate::error::LoadError;
use crate::signal::StopSignal;
use crate::worker::{CounterWorker, Outcome, WorkerId, WorkerReport};

const JOIN_POLL: Duration = Duration::from_millis(1);

/// What a group (or a whole fleet) looked like once it was joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub workers: usize,
    /// Completed steps. `None` when the workers ran in another process.
    pub steps: Option<u64>,
    pub faulted: usize,
    /// Workers still running when the grace period ran out.
    pub forced: usize,
}

impl GroupReport {
    /// An empty report that `merge` can accumulate into.
    pub fn empty() -> Self {
        Self {
            steps: Some(0),
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: GroupReport) {
        self.workers += other.workers;
        self.steps = match (self.steps, other.steps) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        self.faulted += other.faulted;
        self.forced += other.forced;
    }
}

/// Counter workers running as threads of this process, sharing one stop
/// signal.
pub struct WorkerGroup {
    group: usize,
    handles: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerGroup {
    /// Spawns `count` workers, building each one's pattern with `make`.
    ///
    /// If a spawn fails the stop signal is raised and the workers already
    /// started are joined before the error is returned.
    pub fn start<P, F>(
        group: usize,
        count: usize,
        stop: &StopSignal,
        pause: Duration,
        board: Option<&StateBoard>,
        mut make: F,
    ) -> Result<Self, LoadError>
    where
        P: LoadPattern + 'static,
        F: FnMut(WorkerId) -> P,
    {
        let mut handles = Vec::new();

        for index in 0..count {
            let id = WorkerId { group, index };
            let mut worker = CounterWorker::new(id, make(id), stop.clone(), pause);
            if let Some(board) = board {
                worker = worker.with_board(board.clone());
            }

            let spawned = thread::Builder::new()
                .name(format!("counter-{id}"))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::error!(%id, "failed to spawn worker: {e}");
                    stop.set();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(LoadError::Spawn(e));
                }
            }
        }

        tracing::debug!(group, workers = count, "worker group started");
        Ok(Self { group, handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit, giving up on stragglers once `grace`
    /// has passed. Threads cannot be killed, so stragglers are only counted.
    /// `Duration::MAX` waits for as long as it takes.
    pub fn join(self, grace: Duration) -> GroupReport {
        let deadline = Instant::now().checked_add(grace);
        while deadline.map_or(true, |d| Instant::now() < d)
            && !self.handles.iter().all(|h| h.is_finished())
        {
            thread::sleep(JOIN_POLL);
        }

        let mut report = GroupReport {
            workers: self.handles.len(),
            steps: Some(0),
            ..GroupReport::default()
        };
        let mut steps = 0;

        for handle in self.handles {
            if !handle.is_finished() {
                report.forced += 1;
                continue;
            }
            match handle.join() {
                Ok(worker) => {
                    steps += worker.steps;
                    if let Outcome::Faulted(_) = worker.outcome {
                        report.faulted += 1;
                    }
                }
                Err(_) => report.faulted += 1,
            }
        }

        if report.forced > 0 {
            tracing::warn!(
                group = self.group,
                stragglers = report.forced,
                "workers ignored the stop signal"
            );
        }
        report.steps = Some(steps);
        report
    }
}
