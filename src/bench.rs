//! Benchmark support: bounded fan-out, fio result parsing and the JSON artifact

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{E2eError, Result};

/// Fan-out used for installing tools and running benchmarks across pods
pub const DEFAULT_PARALLELISM: usize = 3;

pub const UNIT_MIB_PER_SEC: &str = "MiB/s";

/// Where each pod receives the fio job file
pub const FIO_POD_CONFIG: &str = "/c.fio";

pub const INSTALL_FIO_COMMAND: &str = "apt-get update && apt-get install fio -y";

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

type TaskOutcome<T> = std::result::Result<Result<T>, Box<dyn Any + Send>>;

/// Run `tasks` with at most `limit` in flight, returning results in task order.
///
/// A panicking task yields `TaskPanicked` for its index; the others still
/// run to completion.
pub async fn run_bounded<T, Fut>(limit: usize, tasks: impl IntoIterator<Item = Fut>) -> Vec<Result<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut set: JoinSet<(usize, TaskOutcome<T>)> = JoinSet::new();
    let mut count = 0;

    for (index, task) in tasks.into_iter().enumerate() {
        count += 1;
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, Ok(Err(E2eError::TaskCancelled { index }))),
            };
            (index, AssertUnwindSafe(task).catch_unwind().await)
        });
    }

    let mut results: Vec<Option<Result<T>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(result))) => results[index] = Some(result),
            Ok((index, Err(payload))) => {
                let message = panic_message(payload.as_ref());
                warn!("Task {} panicked: {}", index, message);
                results[index] = Some(Err(E2eError::TaskPanicked { index, message }));
            }
            // Only reachable when the runtime shuts down; filled in below
            Err(e) => warn!("Task join failed: {}", e),
        }
    }

    results
        .into_iter()
        .enumerate()
        .map(|(index, result)| result.unwrap_or_else(|| Err(E2eError::TaskCancelled { index })))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Default, Deserialize)]
struct FioMetrics {
    #[serde(default)]
    bw_bytes: f64,
}

#[derive(Debug, Deserialize)]
struct FioJob {
    #[serde(default)]
    read: FioMetrics,
    #[serde(default)]
    write: FioMetrics,
}

#[derive(Debug, Deserialize)]
struct FioResult {
    jobs: Vec<FioJob>,
}

/// Throughput in MiB/s of the first job in fio's JSON output.
///
/// Read bandwidth is used when `config_name` contains "read", write
/// bandwidth otherwise. Anything fio prints before the JSON document is
/// skipped.
pub fn parse_fio_throughput(config_name: &str, stdout: &str) -> Result<f64> {
    let start = stdout
        .find('{')
        .ok_or_else(|| E2eError::Benchmark(format!("{config_name}: no JSON in fio output")))?;
    let result: FioResult = serde_json::from_str(&stdout[start..])?;
    let job = result
        .jobs
        .first()
        .ok_or_else(|| E2eError::Benchmark(format!("{config_name}: fio reported no jobs")))?;

    let bytes = if config_name.contains("read") {
        job.read.bw_bytes
    } else {
        job.write.bw_bytes
    };
    Ok(bytes / BYTES_PER_MIB)
}

/// Command that runs `config_name` on the shared volume from pod number `index`
pub fn fio_command(config_name: &str, index: usize) -> String {
    format!("FILENAME=/mnt/volume1/{config_name}_{index} fio {FIO_POD_CONFIG} --output-format=json")
}

/// Names of the `*.fio` files in `dir`, without extension, sorted
pub fn fio_config_names(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut configs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("fio") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            configs.push((stem.to_string(), path.clone()));
        }
    }
    configs.sort();
    debug!("Found {} fio configs in {}", configs.len(), dir.display());
    Ok(configs)
}

/// Slowest of the per-pod throughputs
pub fn min_throughput(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// One line of the benchmark artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkEntry {
    pub name: String,
    pub unit: String,
    pub value: String,
}

impl BenchmarkEntry {
    /// Throughput entry in MiB/s, formatted with six decimals
    pub fn throughput(name: impl Into<String>, mib_per_sec: f64) -> Self {
        Self {
            name: name.into(),
            unit: UNIT_MIB_PER_SEC.to_string(),
            value: format!("{mib_per_sec:.6}"),
        }
    }

    pub fn numeric_value(&self) -> Result<f64> {
        self.value
            .parse()
            .map_err(|_| E2eError::Benchmark(format!("{}: value {:?} is not a number", self.name, self.value)))
    }
}

/// Every entry with a configured minimum must reach it
pub fn check_thresholds(entries: &[BenchmarkEntry], minimums: &BTreeMap<String, f64>) -> Result<()> {
    let mut errors = Vec::new();
    for entry in entries {
        let Some(minimum) = minimums.get(&entry.name) else {
            continue;
        };
        match entry.numeric_value() {
            Ok(value) if value >= *minimum => {}
            Ok(value) => errors.push(E2eError::Benchmark(format!(
                "{}: {:.2} {} is below the minimum of {:.2}",
                entry.name, value, entry.unit, minimum
            ))),
            Err(e) => errors.push(e),
        }
    }
    E2eError::aggregate("benchmark thresholds", errors)
}

/// Write the artifact, creating parent directories
pub fn write_output(path: &Path, entries: &[BenchmarkEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec(entries)?)?;
    info!("Wrote {} benchmark entries to {}", entries.len(), path.display());
    Ok(())
}

pub fn read_output(path: &Path) -> Result<Vec<BenchmarkEntry>> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Reshape benchmark results for dashboards.
///
/// A plain artifact (array of entries) becomes one `{commit_id, benchmarks}`
/// record for `commit`. A benchmark history document
/// (`{"entries": {"Benchmark": [{"commit": {"id"}, "benches": [...]}]}}`)
/// becomes an array with one record per recorded commit.
pub fn format_benchmarks(input: &Value, commit: Option<&str>) -> Result<Value> {
    if let Some(history) = input.pointer("/entries/Benchmark").and_then(Value::as_array) {
        let records = history
            .iter()
            .map(|run| -> Result<Value> {
                let commit_id = run
                    .pointer("/commit/id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| E2eError::Benchmark("history entry without commit.id".into()))?;
                let benches: Vec<BenchmarkRecord> =
                    serde_json::from_value(run.get("benches").cloned().unwrap_or(Value::Null))?;
                Ok(record(commit_id, benches.into_iter().map(|b| (b.name, b.value))))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::Array(records));
    }

    let commit = commit
        .ok_or_else(|| E2eError::Benchmark("a commit id is required to format a benchmark artifact".into()))?;
    let entries: Vec<BenchmarkRecord> = serde_json::from_value(input.clone())?;
    Ok(record(commit, entries.into_iter().map(|e| (e.name, e.value))))
}

#[derive(Deserialize)]
struct BenchmarkRecord {
    name: String,
    value: Value,
}

fn record(commit_id: &str, benches: impl Iterator<Item = (String, Value)>) -> Value {
    let benchmarks: serde_json::Map<String, Value> = benches.collect();
    serde_json::json!({
        "commit_id": commit_id,
        "benchmarks": benchmarks,
    })
}
