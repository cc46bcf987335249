use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use crate::shm::SharedSlots;

enum Cell {
    Local(AtomicU64),
    #[cfg(unix)]
    Shared(SharedSlots),
}

impl Cell {
    fn flag(&self) -> &AtomicU64 {
        match self {
            Cell::Local(flag) => flag,
            #[cfg(unix)]
            Cell::Shared(region) => &region.slots()[0],
        }
    }
}

/// Cooperative stop flag shared by every worker of one run.
///
/// Cloning hands out another reference to the same flag. Once set it stays
/// set for the rest of the run.
#[derive(Clone)]
pub struct StopSignal {
    cell: Arc<Cell>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell::Local(AtomicU64::new(0))),
        }
    }

    /// A flag that forked children observe too. Must be created before the
    /// children are forked.
    #[cfg(unix)]
    pub fn shared() -> std::io::Result<Self> {
        Ok(Self {
            cell: Arc::new(Cell::Shared(SharedSlots::new(1)?)),
        })
    }

    /// Raises the flag. Returns `true` only for the call that raised it.
    pub fn set(&self) -> bool {
        self.cell.flag().swap(1, Ordering::SeqCst) == 0
    }

    pub fn is_set(&self) -> bool {
        self.cell.flag().load(Ordering::SeqCst) != 0
    }

    /// Whether forked children see this flag.
    pub fn is_shared(&self) -> bool {
        match *self.cell {
            Cell::Local(_) => false,
            #[cfg(unix)]
            Cell::Shared(_) => true,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("set", &self.is_set())
            .finish()
    }
}
