//! Artificial CPU load: counter workers spinning on every core until a stop
//! key is pressed.

pub mod board;
pub mod cli;
pub mod coordinator;
pub mod counter;
pub mod cpu_stress;
pub mod error;
#[cfg(unix)]
pub mod fork_stress;
pub mod logging;
pub mod probe;
#[cfg(unix)]
mod shm;
pub mod signal;
pub mod watcher;
pub mod worker;

pub use cli::{Cli, Config};
pub use coordinator::{launch, run, CoreSource, LoadPlan, NumCpus, RunReport, Running, Strategy};
pub use error::{ConfigError, LoadError};
pub use signal::StopSignal;
