use std::io;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Registry,
};

fn default_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Diagnostics go to stderr so they never mix with the progress lines on
/// stdout. `RUST_LOG` overrides the level picked by `-v`.
pub fn init(verbosity: u8) -> Result<(), TryInitError> {
    Registry::default()
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level(verbosity).into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(default_level(0), LevelFilter::WARN);
        assert_eq!(default_level(2), LevelFilter::DEBUG);
        assert_eq!(default_level(9), LevelFilter::TRACE);
    }
}
