//! Time spent per code path of the profiled pipeline.
//!
//! Every instrumented closure reports its elapsed time under a `(depth,
//! path)` key. The aggregate is serialized to JSON next to the wall times of
//! the parallel and sequential runs.

use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Instrumented part of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePath {
    Split,
    Process,
    Merge,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Timing {
    calls: u64,
    total: Duration,
    max: Duration,
}

/// Shared recorder, cloned into every instrumented closure.
#[derive(Clone, Debug, Default)]
pub struct Recorder(Arc<Mutex<BTreeMap<(usize, CodePath), Timing>>>);

impl Recorder {
    pub fn record(&self, depth: usize, path: CodePath, elapsed: Duration) {
        let mut timings = self.0.lock();
        let timing = timings.entry((depth, path)).or_default();
        timing.calls += 1;
        timing.total += elapsed;
        timing.max = timing.max.max(elapsed);
    }

    pub fn calls(&self, depth: usize, path: CodePath) -> u64 {
        self.0.lock().get(&(depth, path)).map_or(0, |t| t.calls)
    }

    fn entries(&self) -> Vec<PathTiming> {
        self.0
            .lock()
            .iter()
            .map(|(&(depth, path), timing)| PathTiming {
                depth,
                path,
                calls: timing.calls,
                total_us: timing.total.as_micros(),
                mean_us: timing
                    .total
                    .as_micros()
                    .checked_div(u128::from(timing.calls))
                    .unwrap_or_default(),
                max_us: timing.max.as_micros(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct PathTiming {
    depth: usize,
    path: CodePath,
    calls: u64,
    total_us: u128,
    mean_us: u128,
    max_us: u128,
}

/// Everything written to the capture file.
#[derive(Debug, Serialize)]
pub struct Capture {
    pub child_ratio: usize,
    pub pool_sizes: Vec<usize>,
    pub task_delay_ms: u128,
    pub leaf_calls: usize,
    pub parallel_ms: f64,
    pub sequential_ms: Option<f64>,
    pub speedup: Option<f64>,
    paths: Vec<PathTiming>,
}

impl Capture {
    pub fn new(
        child_ratio: usize,
        pool_sizes: Vec<usize>,
        task_delay: Duration,
        leaf_calls: usize,
        parallel: Duration,
        sequential: Option<Duration>,
        recorder: &Recorder,
    ) -> Self {
        let parallel_ms = parallel.as_secs_f64() * 1e3;
        let sequential_ms = sequential.map(|s| s.as_secs_f64() * 1e3);
        Self {
            child_ratio,
            pool_sizes,
            task_delay_ms: task_delay.as_millis(),
            leaf_calls,
            parallel_ms,
            sequential_ms,
            speedup: sequential_ms
                .filter(|_| parallel_ms > 0.0)
                .map(|s| s / parallel_ms),
            paths: recorder.entries(),
        }
    }

    /// Writes the capture as pretty JSON to `dir/name`, returning the path.
    pub fn write(&self, dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        let file = std::fs::File::create(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(path)
    }
}
