//! The synthetic load: a counter bouncing between a floor and a ceiling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub value: u64,
    pub direction: Direction,
}

/// One unit of synthetic work per `advance` call.
#[cfg_attr(test, mockall::automock)]
pub trait LoadPattern: Send {
    fn start(&mut self) -> CounterState;
    fn advance(&mut self, state: CounterState) -> CounterState;
}

/// Shape of an [`UpDown`] pattern, shared by every worker of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct UpDownSpec {
    pub floor: u64,
    pub ceiling: u64,
    pub step: u64,
    pub flip_chance: f64,
    pub random_start: bool,
}

impl Default for UpDownSpec {
    fn default() -> Self {
        Self {
            floor: 1,
            ceiling: u32::MAX as u64,
            step: 1,
            flip_chance: 0.0,
            random_start: false,
        }
    }
}

impl UpDownSpec {
    pub fn build(&self) -> UpDown {
        UpDown {
            spec: self.clone(),
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn build_seeded(&self, seed: u64) -> UpDown {
        UpDown {
            spec: self.clone(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

/// Counts from the floor up to the ceiling and back down, forever.
///
/// Reaching an end turns the counter around on the very next step, so every
/// level between floor and ceiling is visited. With a non-zero
/// `flip_chance` the direction may also turn around mid-range.
pub struct UpDown {
    spec: UpDownSpec,
    rng: StdRng,
}

impl LoadPattern for UpDown {
    fn start(&mut self) -> CounterState {
        let spec = &self.spec;
        if !spec.random_start {
            return CounterState {
                value: spec.floor,
                direction: Direction::Ascending,
            };
        }

        let value = self.rng.random_range(spec.floor..=spec.ceiling);
        let direction = if self.rng.random_bool(0.5) {
            Direction::Ascending
        } else {
            Direction::Descending
        };
        CounterState { value, direction }
    }

    fn advance(&mut self, state: CounterState) -> CounterState {
        let UpDownSpec {
            floor,
            ceiling,
            step,
            flip_chance,
            ..
        } = self.spec;

        let mut direction = match state.direction {
            Direction::Ascending if state.value >= ceiling => Direction::Descending,
            Direction::Descending if state.value <= floor => Direction::Ascending,
            d => d,
        };

        let value = match direction {
            Direction::Ascending => state.value.saturating_add(step).min(ceiling),
            Direction::Descending => state.value.saturating_sub(step).max(floor),
        };

        if flip_chance > 0.0 && self.rng.random_bool(flip_chance) {
            direction = direction.flipped();
        }

        CounterState { value, direction }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn bounded(ceiling: u64) -> UpDown {
        UpDownSpec {
            ceiling,
            ..UpDownSpec::default()
        }
        .build_seeded(7)
    }

    #[test]
    fn plain_start_is_the_floor_going_up() {
        let mut pattern = bounded(10);
        assert_eq!(
            pattern.start(),
            CounterState {
                value: 1,
                direction: Direction::Ascending
            }
        );
    }

    #[test]
    fn ceiling_turns_down_without_skipping_a_level() {
        let mut pattern = bounded(5);
        let next = pattern.advance(CounterState {
            value: 5,
            direction: Direction::Ascending,
        });
        assert_eq!(
            next,
            CounterState {
                value: 4,
                direction: Direction::Descending
            }
        );
    }

    #[test]
    fn floor_turns_up() {
        let mut pattern = bounded(5);
        let next = pattern.advance(CounterState {
            value: 1,
            direction: Direction::Descending,
        });
        assert_eq!(
            next,
            CounterState {
                value: 2,
                direction: Direction::Ascending
            }
        );
    }

    #[test]
    fn full_cycle_visits_every_level() {
        let mut pattern = bounded(4);
        let mut state = pattern.start();
        let mut seen = vec![state.value];
        for _ in 0..6 {
            state = pattern.advance(state);
            seen.push(state.value);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 3, 2, 1]);
    }

    #[test]
    fn large_step_is_clamped_to_the_range() {
        let mut pattern = UpDownSpec {
            ceiling: 10,
            step: 7,
            ..UpDownSpec::default()
        }
        .build_seeded(1);
        let up = pattern.advance(CounterState {
            value: 8,
            direction: Direction::Ascending,
        });
        assert_eq!(up.value, 10);
        let down = pattern.advance(CounterState {
            value: 3,
            direction: Direction::Descending,
        });
        assert_eq!(down.value, 1);
    }

    #[test]
    fn top_of_range_does_not_overflow() {
        let mut pattern = UpDownSpec {
            ceiling: u64::MAX,
            step: u64::MAX,
            ..UpDownSpec::default()
        }
        .build_seeded(1);
        let next = pattern.advance(CounterState {
            value: u64::MAX - 1,
            direction: Direction::Ascending,
        });
        assert_eq!(next.value, u64::MAX);
    }

    #[test]
    fn certain_flip_reverses_every_step() {
        let mut pattern = UpDownSpec {
            ceiling: 100,
            flip_chance: 1.0,
            ..UpDownSpec::default()
        }
        .build_seeded(3);
        let next = pattern.advance(CounterState {
            value: 50,
            direction: Direction::Ascending,
        });
        assert_eq!(next.value, 51);
        assert_eq!(next.direction, Direction::Descending);
    }

    #[test]
    fn random_start_stays_in_range() {
        let mut pattern = UpDownSpec {
            ceiling: 100,
            random_start: true,
            ..UpDownSpec::default()
        }
        .build_seeded(11);
        for _ in 0..200 {
            let state = pattern.start();
            assert!((1..=100).contains(&state.value));
        }
    }
}
