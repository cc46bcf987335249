//! Worker groups in separate OS processes.
//!
//! Each group is a forked child running a [`WorkerGroup`] of its own. The
//! stop signal and the state board must live in shared memory
//! ([`StopSignal::shared`], [`StateBoard::shared`]) so the children observe
//! the parent's stop and the parent sees the children's state.

use std::io;
use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use libc::{c_int, pid_t};

use crate::board::StateBoard;
use crate::counter::LoadPattern;
use crate::cpu_stress::{GroupReport, WorkerGroup};
use crate::error::LoadError;
use crate::signal::StopSignal;
use crate::worker::WorkerId;

const REAP_POLL: Duration = Duration::from_millis(5);

/// Highest fault count a child can report through its exit status.
const MAX_REPORTED_FAULTS: usize = 125;
/// Exit status of a child whose threads could not be spawned.
const SPAWN_FAILED: c_int = 126;

struct Child {
    group: usize,
    pid: pid_t,
    workers: usize,
}

pub struct ProcessFleet {
    children: Vec<Child>,
}

impl ProcessFleet {
    /// Forks `groups` children with `workers_per_group` counter threads each.
    ///
    /// No other thread of this process should be holding locks while this
    /// runs; the children only inherit the calling thread.
    pub fn start<P, F>(
        groups: usize,
        workers_per_group: usize,
        stop: &StopSignal,
        pause: Duration,
        board: Option<&StateBoard>,
        mut make: F,
    ) -> Result<Self, LoadError>
    where
        P: LoadPattern + 'static,
        F: FnMut(WorkerId) -> P,
    {
        let mut fleet = ProcessFleet {
            children: Vec::new(),
        };

        for group in 0..groups {
            let pid = unsafe { libc::fork() };
            if pid == 0 {
                let code = run_child(group, workers_per_group, stop, pause, board, &mut make);
                unsafe { libc::_exit(code) };
            } else if pid > 0 {
                tracing::debug!(group, pid, "worker process forked");
                fleet.children.push(Child {
                    group,
                    pid,
                    workers: workers_per_group,
                });
            } else {
                let e = io::Error::last_os_error();
                tracing::error!(group, "fork failed: {e}");
                stop.set();
                // Dropping the fleet reaps the children already forked.
                return Err(LoadError::Fork(e));
            }
        }

        Ok(fleet)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Reaps every child, killing the ones still alive once `grace` has
    /// passed.
    pub fn join(mut self, grace: Duration) -> GroupReport {
        let mut pending = mem::take(&mut self.children);
        let mut report = GroupReport::empty();
        let deadline = Instant::now().checked_add(grace);

        loop {
            pending.retain(|child| match try_reap(child.pid) {
                Reaped::Running => true,
                Reaped::Exited(status) => {
                    report.merge(child_report(child, status));
                    false
                }
            });
            if pending.is_empty() || deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            thread::sleep(REAP_POLL);
        }

        for child in pending {
            tracing::warn!(group = child.group, pid = child.pid, "killing worker process");
            kill_and_reap(child.pid);
            report.merge(GroupReport {
                workers: child.workers,
                steps: None,
                faulted: 0,
                forced: child.workers,
            });
        }

        report.steps = None;
        report
    }
}

impl Drop for ProcessFleet {
    fn drop(&mut self) {
        for child in self.children.drain(..) {
            kill_and_reap(child.pid);
        }
    }
}

fn run_child<P, F>(
    group: usize,
    workers: usize,
    stop: &StopSignal,
    pause: Duration,
    board: Option<&StateBoard>,
    make: &mut F,
) -> c_int
where
    P: LoadPattern + 'static,
    F: FnMut(WorkerId) -> P,
{
    match WorkerGroup::start(group, workers, stop, pause, board, make) {
        Ok(workers) => {
            // The parent enforces the grace period.
            let report = workers.join(Duration::MAX);
            report.faulted.min(MAX_REPORTED_FAULTS) as c_int
        }
        Err(_) => SPAWN_FAILED,
    }
}

enum Reaped {
    Running,
    Exited(c_int),
}

fn try_reap(pid: pid_t) -> Reaped {
    let mut status: c_int = 0;
    let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    match rc {
        0 => Reaped::Running,
        // Already reaped elsewhere; nothing left to wait for.
        -1 => Reaped::Exited(0),
        _ => Reaped::Exited(status),
    }
}

fn kill_and_reap(pid: pid_t) {
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        let mut status: c_int = 0;
        libc::waitpid(pid, &mut status, 0);
    }
}

fn child_report(child: &Child, status: c_int) -> GroupReport {
    let faulted = if libc::WIFEXITED(status) {
        match libc::WEXITSTATUS(status) {
            SPAWN_FAILED => child.workers,
            n => (n as usize).min(child.workers),
        }
    } else {
        tracing::warn!(group = child.group, pid = child.pid, "worker process died abnormally");
        child.workers
    };

    GroupReport {
        workers: child.workers,
        steps: None,
        faulted,
        forced: 0,
    }
}
