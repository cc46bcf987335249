//! Sizing, launching and stopping a whole load run.

use std::io;
use std::time::{Duration, Instant};

use crate::board::{Monitor, StateBoard};
use crate::cli::Config;
use crate::cpu_stress::{GroupReport, WorkerGroup};
use crate::error::{ConfigError, LoadError};
use crate::probe::CpuProbe;
use crate::signal::StopSignal;
use crate::watcher::{KeySource, TerminationWatcher, WatchOutcome};
use crate::worker::MAX_WORKERS;

#[cfg(unix)]
use crate::fork_stress::ProcessFleet;

/// Where the number of cores comes from.
#[cfg_attr(test, mockall::automock)]
pub trait CoreSource {
    /// Always at least 1.
    fn available_cores(&self) -> usize;
}

/// Logical CPUs as reported by the OS.
pub struct NumCpus;

impl CoreSource for NumCpus {
    fn available_cores(&self) -> usize {
        num_cpus::get().max(1)
    }
}

/// A fixed core count.
impl CoreSource for usize {
    fn available_cores(&self) -> usize {
        (*self).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    /// Every worker is a thread of this process.
    Threads,
    /// One child process per core, less one kept free for the stop key.
    Processes,
}

/// How many workers a run gets and how they are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    pub strategy: Strategy,
    pub cores: usize,
    pub times: usize,
    pub groups: usize,
    pub workers_per_group: usize,
}

impl LoadPlan {
    pub fn new(strategy: Strategy, cores: usize, times: usize) -> Self {
        let cores = cores.max(1);
        let times = times.max(1);
        let (groups, workers_per_group) = match strategy {
            Strategy::Threads => (1, cores.saturating_mul(times)),
            Strategy::Processes => ((cores - 1).max(1), times),
        };
        Self {
            strategy,
            cores,
            times,
            groups,
            workers_per_group,
        }
    }

    pub fn total_workers(&self) -> usize {
        self.groups.saturating_mul(self.workers_per_group)
    }
}

/// The stop signal a run with `strategy` needs. Processes need one in
/// shared memory.
pub fn stop_signal_for(strategy: Strategy) -> Result<StopSignal, LoadError> {
    match strategy {
        Strategy::Threads => Ok(StopSignal::new()),
        #[cfg(unix)]
        Strategy::Processes => StopSignal::shared().map_err(LoadError::SharedMemory),
        #[cfg(not(unix))]
        Strategy::Processes => Err(ConfigError::ProcessesUnsupported.into()),
    }
}

enum Fleet {
    Threads(WorkerGroup),
    #[cfg(unix)]
    Processes(ProcessFleet),
}

/// A launched run. Dropping it without [`Running::shutdown`] leaves thread
/// workers running until the stop signal is raised; child processes are
/// killed.
pub struct Running {
    plan: LoadPlan,
    stop: StopSignal,
    board: Option<StateBoard>,
    fleet: Fleet,
    grace: Duration,
    started: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub plan: LoadPlan,
    pub workers: GroupReport,
    pub elapsed: Duration,
}

/// Starts every worker of `config` on the cores reported by `cores`.
///
/// With [`Strategy::Processes`] the `stop` signal must come from
/// [`stop_signal_for`]; a process-local one would never reach the children.
pub fn launch(
    config: &Config,
    cores: &dyn CoreSource,
    stop: StopSignal,
) -> Result<Running, LoadError> {
    config.validate()?;
    let plan = LoadPlan::new(config.strategy, cores.available_cores(), config.times);
    if plan.total_workers() > MAX_WORKERS {
        return Err(ConfigError::TooManyWorkers {
            requested: plan.total_workers(),
            max: MAX_WORKERS,
        }
        .into());
    }
    let make = |_| config.pattern.build();

    let (fleet, board) = match plan.strategy {
        Strategy::Threads => {
            let board = if config.visual {
                Some(StateBoard::new(plan.groups, plan.workers_per_group)?)
            } else {
                None
            };
            let group = WorkerGroup::start(
                0,
                plan.workers_per_group,
                &stop,
                config.pause,
                board.as_ref(),
                make,
            )?;
            (Fleet::Threads(group), board)
        }
        #[cfg(unix)]
        Strategy::Processes => {
            if !stop.is_shared() {
                return Err(ConfigError::LocalStopSignal.into());
            }
            let board = if config.visual {
                Some(StateBoard::shared(plan.groups, plan.workers_per_group)?)
            } else {
                None
            };
            let fleet = ProcessFleet::start(
                plan.groups,
                plan.workers_per_group,
                &stop,
                config.pause,
                board.as_ref(),
                make,
            )?;
            (Fleet::Processes(fleet), board)
        }
        #[cfg(not(unix))]
        Strategy::Processes => return Err(ConfigError::ProcessesUnsupported.into()),
    };

    tracing::info!(
        strategy = ?plan.strategy,
        groups = plan.groups,
        workers = plan.total_workers(),
        "load started"
    );

    Ok(Running {
        plan,
        stop,
        board,
        fleet,
        grace: config.grace,
        started: Instant::now(),
    })
}

impl Running {
    pub fn plan(&self) -> &LoadPlan {
        &self.plan
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn board(&self) -> Option<&StateBoard> {
        self.board.as_ref()
    }

    /// Raises the stop signal (a no-op if it already is) and waits for every
    /// worker, forcing the ones that outlive the grace period.
    pub fn shutdown(self) -> RunReport {
        self.stop.set();
        let workers = match self.fleet {
            Fleet::Threads(group) => group.join(self.grace),
            #[cfg(unix)]
            Fleet::Processes(fleet) => fleet.join(self.grace),
        };

        tracing::debug!(?workers, "load stopped");
        RunReport {
            plan: self.plan,
            workers,
            elapsed: self.started.elapsed(),
        }
    }
}

/// One interactive run: launch, wait for the stop key, shut down, report.
pub fn run<K: KeySource>(
    config: &Config,
    cores: &dyn CoreSource,
    keys: K,
    stop: StopSignal,
) -> Result<RunReport, LoadError> {
    let plan = LoadPlan::new(config.strategy, cores.available_cores(), config.times);
    println!(
        "Starting load test on {} cores, {} times, ie {} threads ... ",
        plan.cores,
        plan.times,
        plan.total_workers()
    );

    let probe = CpuProbe::start();
    let running = launch(config, cores, stop)?;

    let (running, monitor) = attach_monitor(running, config.pattern.ceiling, Monitor::start)?;

    println!("Running load test.");
    println!("Awaiting key press ... ({} to stop)", key_name(config.key));
    let outcome = TerminationWatcher::new(keys, config.key)
        .with_poll(config.poll)
        .watch(running.stop_signal());
    let usage = probe.finish();

    match outcome {
        WatchOutcome::KeyPressed => println!("Key pressed"),
        WatchOutcome::Interrupted => println!("Interrupted"),
    }

    println!("Waiting for threads to finish..");
    let report = running.shutdown();
    if let Some(monitor) = monitor {
        monitor.join();
    }

    let steps = match report.workers.steps {
        Some(steps) => format!("{steps} steps"),
        None => "steps not tracked".to_string(),
    };
    println!(
        "Load test stopped. {} workers, {}, {:.1}% CPU over {:.1}s",
        report.workers.workers,
        steps,
        usage,
        report.elapsed.as_secs_f64()
    );

    if report.workers.faulted > 0 {
        tracing::warn!(faulted = report.workers.faulted, "some workers faulted");
    }
    if report.workers.forced > 0 {
        return Err(LoadError::ShutdownTimeout {
            forced: report.workers.forced,
        });
    }
    Ok(report)
}

/// Starts the redraw thread for visual runs. If it cannot start, the
/// workers are shut down before the error is returned.
fn attach_monitor<F>(
    running: Running,
    ceiling: u64,
    start: F,
) -> Result<(Running, Option<Monitor>), LoadError>
where
    F: FnOnce(StateBoard, u64, StopSignal) -> io::Result<Monitor>,
{
    let Some(board) = running.board().cloned() else {
        return Ok((running, None));
    };
    match start(board, ceiling, running.stop_signal().clone()) {
        Ok(monitor) => Ok((running, Some(monitor))),
        Err(e) => {
            tracing::error!("failed to start the monitor: {e}");
            running.shutdown();
            Err(LoadError::Spawn(e))
        }
    }
}

fn key_name(key: char) -> String {
    match key {
        ' ' => "Space bar".to_string(),
        c => format!("'{c}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn cores(n: usize) -> MockCoreSource {
        let mut cores = MockCoreSource::new();
        cores.expect_available_cores().return_const(n);
        cores
    }

    #[test_case(Strategy::Threads, 4, 3 => (1, 12); "threads get cores times multiplier")]
    #[test_case(Strategy::Threads, 1, 1 => (1, 1); "one core one worker")]
    #[test_case(Strategy::Threads, 8, 5 => (1, 40); "eight cores")]
    #[test_case(Strategy::Processes, 4, 3 => (3, 9); "processes leave one core free")]
    #[test_case(Strategy::Processes, 1, 2 => (1, 2); "a single core still gets one process")]
    #[test_case(Strategy::Processes, 8, 5 => (7, 35); "eight cores as processes")]
    #[test_case(Strategy::Threads, 0, 0 => (1, 1); "zeroes are raised to one")]
    fn plan_size(strategy: Strategy, cores: usize, times: usize) -> (usize, usize) {
        let plan = LoadPlan::new(strategy, cores, times);
        (plan.groups, plan.total_workers())
    }

    #[test]
    fn huge_multipliers_saturate_instead_of_overflowing() {
        let plan = LoadPlan::new(Strategy::Threads, usize::MAX, 2);
        assert_eq!(plan.total_workers(), usize::MAX);
    }

    #[test]
    fn unknown_core_count_falls_back_to_one() {
        assert_eq!(0usize.available_cores(), 1);
        assert!(NumCpus.available_cores() >= 1);
    }

    #[test]
    fn launch_asks_for_the_core_count_once() {
        let mut source = MockCoreSource::new();
        source.expect_available_cores().times(1).return_const(2usize);

        let stop = StopSignal::new();
        stop.set();
        let config = Config {
            pause: Duration::ZERO,
            ..Config::default()
        };
        let report = launch(&config, &source, stop).unwrap().shutdown();
        assert_eq!(report.workers.workers, 2);
    }

    #[test]
    fn too_many_workers_is_refused_before_anything_starts() {
        let config = Config {
            times: MAX_WORKERS,
            ..Config::default()
        };
        let stop = StopSignal::new();
        let err = launch(&config, &cores(4), stop.clone()).err().unwrap();
        match &err {
            LoadError::Config(ConfigError::TooManyWorkers { requested, max }) => {
                assert_eq!(*requested, 4 * MAX_WORKERS);
                assert_eq!(*max, MAX_WORKERS);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 2);
        assert!(!stop.is_set());
    }

    #[test]
    fn the_worker_limit_itself_is_allowed() {
        let plan = LoadPlan::new(Strategy::Threads, 1, MAX_WORKERS);
        assert_eq!(plan.total_workers(), MAX_WORKERS);
        let over = LoadPlan::new(Strategy::Threads, 2, MAX_WORKERS);
        assert!(over.total_workers() > MAX_WORKERS);
    }

    #[test]
    fn a_monitor_that_cannot_start_stops_the_workers() {
        let config = Config {
            visual: true,
            pause: Duration::from_millis(1),
            ..Config::default()
        };
        let stop = StopSignal::new();
        let running = launch(&config, &cores(2), stop.clone()).unwrap();

        let result = attach_monitor(running, 100, |_, _, _| {
            Err(io::Error::new(io::ErrorKind::Other, "no threads left"))
        });

        assert!(matches!(result, Err(LoadError::Spawn(_))));
        assert!(stop.is_set());
    }

    #[test]
    fn plain_runs_need_no_monitor() {
        let stop = StopSignal::new();
        stop.set();
        let running = launch(&Config::default(), &cores(1), stop).unwrap();
        let (running, monitor) =
            attach_monitor(running, 100, |_, _, _| panic!("not visual")).unwrap();
        assert!(monitor.is_none());
        running.shutdown();
    }

    #[test_case(' ' => "Space bar"; "space")]
    #[test_case('q' => "'q'"; "letter")]
    fn key_names(key: char) -> String {
        key_name(key)
    }
}
