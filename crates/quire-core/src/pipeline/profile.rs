//! Development-mode module profiling.
//!
//! Wall time comes from [`Instant`]. CPU time and resident memory are read
//! from procfs on a best-effort basis: a missing or unparsable file yields
//! `None` for that field and never fails the render.

use crate::config::ProfilingThresholds;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

/// Cap on bytes read from a procfs stat file.
const MAX_STAT_READ: usize = 4096;

/// Resident-set pages are converted with the common 4 KiB page size.
const PAGE_SIZE: u64 = 4096;

fn read_bounded(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut buf = String::new();
    file.take(MAX_STAT_READ as u64).read_to_string(&mut buf).ok()?;
    Some(buf)
}

/// CPU time of the calling thread in microseconds.
fn thread_cpu_micros() -> Option<u64> {
    // first field: time spent on the cpu, in nanoseconds
    let stat = read_bounded(Path::new("/proc/thread-self/schedstat"))?;
    let nanos: u64 = stat.split_whitespace().next()?.parse().ok()?;
    Some(nanos / 1_000)
}

/// Resident memory of the process in bytes.
fn resident_bytes() -> Option<u64> {
    let statm = read_bounded(Path::new("/proc/self/statm"))?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages.saturating_mul(PAGE_SIZE))
}

/// Measurements of one module render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleProfile {
    pub wall_micros: u64,
    pub cpu_micros: Option<u64>,
    /// Growth of resident memory; negative deltas read as 0.
    pub memory_bytes: Option<u64>,
    pub queries: u64,
}

impl ModuleProfile {
    /// Names of the thresholds this profile exceeds.
    #[must_use]
    pub fn breaches(&self, limits: &ProfilingThresholds) -> Vec<&'static str> {
        let mut over = Vec::new();
        if self.wall_micros > limits.max_wall_micros {
            over.push("wall_time");
        }
        if self.cpu_micros.is_some_and(|cpu| cpu > limits.max_cpu_micros) {
            over.push("cpu_time");
        }
        if self.memory_bytes.is_some_and(|mem| mem > limits.max_memory_bytes) {
            over.push("memory");
        }
        if self.queries > limits.max_queries {
            over.push("queries");
        }
        over
    }
}

/// Started before a module renders, finished after.
pub(crate) struct Probe {
    started: Instant,
    cpu: Option<u64>,
    memory: Option<u64>,
    queries: u64,
}

impl Probe {
    pub(crate) fn start(queries: u64) -> Self {
        Self {
            started: Instant::now(),
            cpu: thread_cpu_micros(),
            memory: resident_bytes(),
            queries,
        }
    }

    pub(crate) fn finish(self, queries: u64) -> ModuleProfile {
        let wall = self.started.elapsed().as_micros();
        ModuleProfile {
            wall_micros: u64::try_from(wall).unwrap_or(u64::MAX),
            cpu_micros: self
                .cpu
                .zip(thread_cpu_micros())
                .map(|(before, after)| after.saturating_sub(before)),
            memory_bytes: self
                .memory
                .zip(resident_bytes())
                .map(|(before, after)| after.saturating_sub(before)),
            queries: queries.saturating_sub(self.queries),
        }
    }
}
