use std::io;

/// Rejected option values. Reported before any worker starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ceiling {ceiling} must be above the floor {floor}")]
    CeilingTooLow { ceiling: u64, floor: u64 },
    #[error("ceiling {0} does not fit in a state slot (max {max})", max = crate::board::MAX_LEVEL)]
    CeilingTooHigh(u64),
    #[error("step must be at least 1")]
    ZeroStep,
    #[error("flip chance {0} is not a probability")]
    FlipChance(f64),
    #[error("{name} must be a finite, non-negative number of milliseconds, got {value}")]
    Duration { name: &'static str, value: f64 },
    #[error("{requested} workers requested, at most {max} are supported")]
    TooManyWorkers { requested: usize, max: usize },
    #[error("worker processes need a stop signal in shared memory")]
    LocalStopSignal,
    #[error("the process strategy is only available on unix")]
    ProcessesUnsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to fork worker process: {0}")]
    Fork(#[source] io::Error),
    #[error("failed to map shared memory: {0}")]
    SharedMemory(#[source] io::Error),
    #[error("{forced} worker(s) did not stop within the grace period")]
    ShutdownTimeout { forced: usize },
    #[error("key source failed: {0}")]
    Terminal(#[source] io::Error),
}

impl LoadError {
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) => 2,
            _ => 1,
        }
    }
}
