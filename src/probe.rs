use std::thread;
use std::time::Instant;

use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Measures global CPU usage between `start` and `finish`.
pub struct CpuProbe {
    sys: System,
    started: Instant,
}

impl CpuProbe {
    pub fn start() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self {
            sys,
            started: Instant::now(),
        }
    }

    /// Average usage of all CPUs in percent. Blocks briefly when called
    /// sooner than sysinfo can produce a meaningful sample.
    pub fn finish(mut self) -> f32 {
        let elapsed = self.started.elapsed();
        if elapsed < MINIMUM_CPU_UPDATE_INTERVAL {
            thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL - elapsed);
        }
        self.sys.refresh_cpu_usage();
        self.sys.global_cpu_usage()
    }
}
