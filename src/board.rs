//! Live worker state for visualisation.
//!
//! Every worker owns exactly one slot and overwrites it with a single atomic
//! store per step, so readers never need a lock. Readers may see a slightly
//! stale value; only the latest write matters.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::counter::{CounterState, Direction};
use crate::error::{ConfigError, LoadError};
use crate::signal::StopSignal;
use crate::worker::{WorkerId, MAX_WORKERS};

#[cfg(unix)]
use crate::shm::SharedSlots;

const PUBLISHED: u64 = 1 << 63;
const DESCENDING: u64 = 1 << 62;

/// Largest counter value a slot can hold.
pub const MAX_LEVEL: u64 = DESCENDING - 1;

fn encode(state: CounterState) -> u64 {
    let dir = match state.direction {
        Direction::Ascending => 0,
        Direction::Descending => DESCENDING,
    };
    PUBLISHED | dir | (state.value & MAX_LEVEL)
}

fn decode(raw: u64) -> Option<CounterState> {
    if raw & PUBLISHED == 0 {
        return None;
    }
    let direction = if raw & DESCENDING != 0 {
        Direction::Descending
    } else {
        Direction::Ascending
    };
    Some(CounterState {
        value: raw & MAX_LEVEL,
        direction,
    })
}

enum Slots {
    Local(Box<[AtomicU64]>),
    #[cfg(unix)]
    Shared(SharedSlots),
}

impl Slots {
    fn get(&self) -> &[AtomicU64] {
        match self {
            Slots::Local(slots) => &slots[..],
            #[cfg(unix)]
            Slots::Shared(region) => region.slots(),
        }
    }
}

/// Mapping from `(group, worker)` to the last published [`CounterState`].
#[derive(Clone)]
pub struct StateBoard {
    slots: Arc<Slots>,
    groups: usize,
    workers: usize,
}

fn slot_count(groups: usize, workers: usize) -> Result<usize, ConfigError> {
    groups
        .checked_mul(workers)
        .filter(|&n| n <= MAX_WORKERS)
        .ok_or(ConfigError::TooManyWorkers {
            requested: groups.saturating_mul(workers),
            max: MAX_WORKERS,
        })
}

impl StateBoard {
    pub fn new(groups: usize, workers: usize) -> Result<Self, ConfigError> {
        let slots = (0..slot_count(groups, workers)?)
            .map(|_| AtomicU64::new(0))
            .collect();
        Ok(Self {
            slots: Arc::new(Slots::Local(slots)),
            groups,
            workers,
        })
    }

    /// A board forked children can publish into. Create it before forking.
    #[cfg(unix)]
    pub fn shared(groups: usize, workers: usize) -> Result<Self, LoadError> {
        let len = slot_count(groups, workers)?;
        Ok(Self {
            slots: Arc::new(Slots::Shared(
                SharedSlots::new(len).map_err(LoadError::SharedMemory)?,
            )),
            groups,
            workers,
        })
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn workers_per_group(&self) -> usize {
        self.workers
    }

    fn slot(&self, id: WorkerId) -> Option<&AtomicU64> {
        if id.group >= self.groups || id.index >= self.workers {
            return None;
        }
        self.slots.get().get(id.group * self.workers + id.index)
    }

    /// Writes are dropped for ids outside the board.
    pub fn publish(&self, id: WorkerId, state: CounterState) {
        if let Some(slot) = self.slot(id) {
            slot.store(encode(state), Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: WorkerId) -> Option<CounterState> {
        self.slot(id)
            .and_then(|slot| decode(slot.load(Ordering::Relaxed)))
    }

    /// Every slot, row per group. Unpublished workers are `None`.
    pub fn snapshot(&self) -> Vec<Vec<Option<CounterState>>> {
        (0..self.groups)
            .map(|group| {
                (0..self.workers)
                    .map(|index| self.get(WorkerId { group, index }))
                    .collect()
            })
            .collect()
    }
}

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One character per worker, groups separated by `|`. Height is the level
/// relative to `ceiling`; unpublished workers render as a blank.
pub fn render(snapshot: &[Vec<Option<CounterState>>], ceiling: u64) -> String {
    let ceiling = ceiling.max(1);
    let rows: Vec<String> = snapshot
        .iter()
        .map(|row| {
            row.iter()
                .map(|state| match state {
                    None => ' ',
                    Some(state) => {
                        let level = state.value.min(ceiling) as u128 * (BARS.len() as u128 - 1)
                            / ceiling as u128;
                        BARS[level as usize]
                    }
                })
                .collect()
        })
        .collect();
    rows.join("|")
}

/// Redraws the board on stderr until the stop signal is raised.
pub struct Monitor {
    handle: thread::JoinHandle<()>,
}

impl Monitor {
    pub const FRAME: Duration = Duration::from_millis(50);

    pub fn start(board: StateBoard, ceiling: u64, stop: StopSignal) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name("monitor".into())
            .spawn(move || {
                let mut err = io::stderr();
                while !stop.is_set() {
                    let line = render(&board.snapshot(), ceiling);
                    let _ = write!(err, "\r{line}");
                    let _ = err.flush();
                    thread::sleep(Self::FRAME);
                }
                let _ = writeln!(err);
            })?;
        Ok(Self { handle })
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!("monitor thread panicked");
        }
    }
}
