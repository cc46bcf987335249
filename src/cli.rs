use std::time::Duration;

use clap::Parser;

use crate::board::MAX_LEVEL;
use crate::coordinator::Strategy;
use crate::counter::UpDownSpec;
use crate::error::ConfigError;

const PLAIN_PAUSE_MS: f64 = 50.0;
const VISUAL_CEILING: u64 = 100;
const VISUAL_FLIP_CHANCE: f64 = 0.01;

/// Puts artificial load on every CPU core by counting up and down until the
/// stop key (Space by default) is pressed.
///
/// Each core gets TIMES counter workers. On a 4-core machine a times value
/// of a few hundred is usually enough to reach 100% usage with the default
/// pause.
#[derive(Parser, Debug)]
#[command(version, about, long_about)]
pub struct Cli {
    /// Counter workers per core (threads) or per process (processes)
    #[arg(
        short,
        long,
        default_value_t = 1,
        env = "LOADSPIN_TIMES",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub times: u32,

    /// Run the workers as threads of one process, or as one process per
    /// core minus one
    #[arg(long, value_enum, default_value_t = Strategy::Threads)]
    pub strategy: Strategy,

    /// Show live worker levels: random starts, random turns, a bar per worker
    #[arg(long)]
    pub visual: bool,

    /// Sleep between steps in milliseconds, 0 to only yield [default: 50, 0 with --visual]
    #[arg(long)]
    pub pause_ms: Option<f64>,

    /// Highest level a counter reaches before turning [default: 4294967295, 100 with --visual]
    #[arg(long)]
    pub ceiling: Option<u64>,

    /// Levels moved per step
    #[arg(long, default_value_t = 1)]
    pub step: u64,

    /// Chance of turning around on any step [default: 0, 0.01 with --visual]
    #[arg(long)]
    pub flip_chance: Option<f64>,

    /// How long workers get to stop before they are killed, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub grace_ms: u64,

    /// How often the stop key is polled, in milliseconds
    #[arg(long, default_value_t = 1.0)]
    pub poll_ms: f64,

    /// Key that stops the run
    #[arg(long, default_value_t = ' ')]
    pub key: char,

    /// More diagnostics on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Validated settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub times: usize,
    pub strategy: Strategy,
    pub visual: bool,
    pub pattern: UpDownSpec,
    pub pause: Duration,
    pub grace: Duration,
    pub poll: Duration,
    pub key: char,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            times: 1,
            strategy: Strategy::Threads,
            visual: false,
            pattern: UpDownSpec::default(),
            pause: Duration::from_millis(PLAIN_PAUSE_MS as u64),
            grace: Duration::from_secs(2),
            poll: Duration::from_millis(1),
            key: ' ',
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let UpDownSpec {
            floor,
            ceiling,
            step,
            flip_chance,
            ..
        } = self.pattern;

        if ceiling <= floor {
            return Err(ConfigError::CeilingTooLow { ceiling, floor });
        }
        if ceiling > MAX_LEVEL {
            return Err(ConfigError::CeilingTooHigh(ceiling));
        }
        if step == 0 {
            return Err(ConfigError::ZeroStep);
        }
        if !(0.0..=1.0).contains(&flip_chance) {
            return Err(ConfigError::FlipChance(flip_chance));
        }
        if self.strategy == Strategy::Processes && !cfg!(unix) {
            return Err(ConfigError::ProcessesUnsupported);
        }
        Ok(())
    }
}

fn millis(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Duration { name, value });
    }
    Ok(Duration::from_secs_f64(value / 1000.0))
}

impl Cli {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let visual = self.visual;
        let base = UpDownSpec::default();

        let pattern = UpDownSpec {
            ceiling: self
                .ceiling
                .unwrap_or(if visual { VISUAL_CEILING } else { base.ceiling }),
            step: self.step,
            flip_chance: self
                .flip_chance
                .unwrap_or(if visual { VISUAL_FLIP_CHANCE } else { 0.0 }),
            random_start: visual,
            ..base
        };

        let pause = self
            .pause_ms
            .unwrap_or(if visual { 0.0 } else { PLAIN_PAUSE_MS });

        let config = Config {
            times: self.times as usize,
            strategy: self.strategy,
            visual,
            pattern,
            pause: millis("--pause-ms", pause)?,
            grace: Duration::from_millis(self.grace_ms),
            poll: millis("--poll-ms", self.poll_ms)?,
            key: self.key,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use test_case::test_case;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("loadspin").chain(args.iter().copied()))
    }

    #[test]
    fn no_arguments_means_times_one() {
        let config = parse(&[]).unwrap().into_config().unwrap();
        assert_eq!(config.times, 1);
        assert_eq!(config.strategy, Strategy::Threads);
        assert_eq!(config.pause, Duration::from_millis(50));
        assert_eq!(config.key, ' ');
        assert!(!config.pattern.random_start);
    }

    #[test_case(&["-t", "20"] => 20; "short")]
    #[test_case(&["--times", "120"] => 120; "long")]
    #[test_case(&["--times=7"] => 7; "long with equals")]
    #[test_case(&["-t", "4000000000"] => 4_000_000_000; "beyond any core count")]
    fn times_is_parsed(args: &[&str]) -> u32 {
        parse(args).unwrap().times
    }

    #[test_case(&["-t", "abc"] => ErrorKind::ValueValidation; "not a number")]
    #[test_case(&["-t", "0"] => ErrorKind::ValueValidation; "zero")]
    #[test_case(&["-t", "5000000000"] => ErrorKind::ValueValidation; "beyond u32")]
    #[test_case(&["--strategy", "fibers"] => ErrorKind::InvalidValue; "unknown strategy")]
    fn bad_arguments_are_rejected(args: &[&str]) -> ErrorKind {
        let err = parse(args).unwrap_err();
        assert_ne!(err.exit_code(), 0);
        err.kind()
    }

    #[test]
    fn visual_changes_the_defaults() {
        let config = parse(&["--visual"]).unwrap().into_config().unwrap();
        assert_eq!(config.pattern.ceiling, 100);
        assert_eq!(config.pattern.flip_chance, 0.01);
        assert!(config.pattern.random_start);
        assert_eq!(config.pause, Duration::ZERO);
    }

    #[test]
    fn explicit_values_beat_visual_defaults() {
        let config = parse(&["--visual", "--ceiling", "10", "--pause-ms", "2.5"])
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.pattern.ceiling, 10);
        assert_eq!(config.pause, Duration::from_micros(2500));
    }

    #[test_case(&["--ceiling", "1"] => matches ConfigError::CeilingTooLow { ceiling: 1, floor: 1 }; "ceiling at the floor")]
    #[test_case(&["--ceiling", "18446744073709551615"] => matches ConfigError::CeilingTooHigh(_); "ceiling past a slot")]
    #[test_case(&["--flip-chance", "1.5"] => matches ConfigError::FlipChance(_); "flip chance above one")]
    #[test_case(&["--step", "0"] => matches ConfigError::ZeroStep; "zero step")]
    #[test_case(&["--pause-ms=-1"] => matches ConfigError::Duration { name: "--pause-ms", .. }; "negative pause")]
    #[test_case(&["--poll-ms", "NaN"] => matches ConfigError::Duration { name: "--poll-ms", .. }; "poll not a number")]
    fn bad_values_are_config_errors(args: &[&str]) -> ConfigError {
        parse(args).unwrap().into_config().unwrap_err()
    }

    #[test_case("threads" => Strategy::Threads; "threads")]
    #[test_case("processes" => Strategy::Processes; "processes")]
    fn strategy_is_selectable(name: &str) -> Strategy {
        parse(&["--strategy", name]).unwrap().strategy
    }
}
