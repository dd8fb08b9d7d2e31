// Calibration engine
//
// Learns each motor's usable encoder range by sampling the bus at a fixed
// period while an operator moves the arm by hand. Results are persisted
// atomically (temp file + rename) so the canonical store is never partial.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::motor::BusManager;

/// Observed encoder range of one motor.
///
/// Starts explicitly uncalibrated; the first observed sample transitions it
/// to calibrated. Once calibrated, `min <= max` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationRecord {
    #[default]
    Uncalibrated,
    Calibrated {
        min: i32,
        max: i32,
    },
}

impl CalibrationRecord {
    /// Fold one reading into the record.
    pub fn observe(&mut self, ticks: i32) {
        *self = match *self {
            CalibrationRecord::Uncalibrated => CalibrationRecord::Calibrated {
                min: ticks,
                max: ticks,
            },
            CalibrationRecord::Calibrated { min, max } => CalibrationRecord::Calibrated {
                min: min.min(ticks),
                max: max.max(ticks),
            },
        };
    }

    pub fn range(&self) -> Option<(i32, i32)> {
        match *self {
            CalibrationRecord::Uncalibrated => None,
            CalibrationRecord::Calibrated { min, max } => Some((min, max)),
        }
    }
}

/// On-disk shape of one calibrated motor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredRange {
    min: i32,
    max: i32,
}

/// Per-motor calibration records for the whole bus
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationSet {
    records: BTreeMap<u8, CalibrationRecord>,
}

impl CalibrationSet {
    /// Fresh set with every motor explicitly uncalibrated.
    pub fn new(ids: &[u8]) -> Self {
        Self {
            records: ids
                .iter()
                .map(|&id| (id, CalibrationRecord::Uncalibrated))
                .collect(),
        }
    }

    pub fn observe(&mut self, id: u8, ticks: i32) {
        self.records.entry(id).or_default().observe(ticks);
    }

    pub fn record(&self, id: u8) -> CalibrationRecord {
        self.records
            .get(&id)
            .copied()
            .unwrap_or(CalibrationRecord::Uncalibrated)
    }

    pub fn is_empty(&self) -> bool {
        self.records
            .values()
            .all(|r| matches!(r, CalibrationRecord::Uncalibrated))
    }

    /// Write the set to `path` atomically.
    ///
    /// The file is a JSON object keyed by motor id, each entry
    /// `{"min": int, "max": int}`; uncalibrated motors are omitted. Data is
    /// written to a sibling temp file first and renamed into place so a crash
    /// mid-write never leaves a truncated canonical file.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let stored: BTreeMap<u8, StoredRange> = self
            .records
            .iter()
            .filter_map(|(&id, record)| {
                record.range().map(|(min, max)| (id, StoredRange { min, max }))
            })
            .collect();

        let json = serde_json::to_string_pretty(&stored)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!("Calibration saved to {}", path.display());
        Ok(())
    }

    /// Load a previously persisted set. Motors absent from the file come back
    /// uncalibrated when queried.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let json = std::fs::read_to_string(path)?;
        let stored: BTreeMap<u8, StoredRange> = serde_json::from_str(&json)?;
        Ok(Self {
            records: stored
                .into_iter()
                .map(|(id, r)| {
                    (
                        id,
                        CalibrationRecord::Calibrated {
                            min: r.min,
                            max: r.max,
                        },
                    )
                })
                .collect(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Calibration store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration store format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Sampling task did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("Sampling task panicked")]
    TaskFailed,
}

/// Timing knobs for a sampling run
#[derive(Debug, Clone, Copy)]
pub struct CalibrationTiming {
    /// Period between samples
    pub period: Duration,
    /// Hard wall-clock ceiling on a run
    pub ceiling: Duration,
    /// Bound on waiting for the sampling task to exit after a stop request
    pub join_timeout: Duration,
}

impl Default for CalibrationTiming {
    fn default() -> Self {
        Self {
            period: crate::config::CALIBRATION_SAMPLE_PERIOD,
            ceiling: crate::config::CALIBRATION_CEILING,
            join_timeout: crate::config::CALIBRATION_JOIN_TIMEOUT,
        }
    }
}

/// Result of a toggle request
#[derive(Debug)]
pub enum ToggleOutcome {
    /// A new sampling run was launched
    Started,
    /// The running sample was stopped; results are persisted and returned
    Stopped(CalibrationSet),
}

struct SamplingRun {
    stop: watch::Sender<bool>,
    handle: JoinHandle<Result<CalibrationSet, CalibrationError>>,
}

/// Idle/Sampling state machine over a background sampling task
pub struct CalibrationEngine {
    bus: Arc<BusManager>,
    store_path: PathBuf,
    timing: CalibrationTiming,
    run: Mutex<Option<SamplingRun>>,
}

impl CalibrationEngine {
    pub fn new(bus: Arc<BusManager>, store_path: PathBuf, timing: CalibrationTiming) -> Self {
        Self {
            bus,
            store_path,
            timing,
            run: Mutex::new(None),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Whether a sampling run is currently active.
    pub async fn is_sampling(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    fn spawn_run(&self) -> SamplingRun {
        info!("Calibration started");
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(sample_loop(
            Arc::clone(&self.bus),
            self.store_path.clone(),
            self.timing,
            stop_rx,
        ));
        SamplingRun {
            stop: stop_tx,
            handle,
        }
    }

    /// Start sampling if Idle. Returns false if a run is already active.
    pub async fn start(&self) -> bool {
        let mut guard = self.run.lock().await;
        if guard.as_ref().is_some_and(|run| !run.handle.is_finished()) {
            return false;
        }

        *guard = Some(self.spawn_run());
        true
    }

    /// Start if Idle; otherwise signal stop and wait for the sampling task
    /// to exit and persist its results.
    ///
    /// A run that already ended at its wall-clock ceiling has persisted on
    /// its own; its leftover handle does not count as Sampling, so the next
    /// toggle starts a fresh run. The stopped arm of this call does not
    /// return until the canonical store file reflects the just-completed
    /// run, so a read-after-toggle always sees the new ranges.
    pub async fn toggle(&self) -> Result<ToggleOutcome, CalibrationError> {
        let mut guard = self.run.lock().await;

        if let Some(run) = guard.take() {
            if !run.handle.is_finished() {
                info!("Calibration stop requested");
                let _ = run.stop.send(true);

                let joined = time::timeout(self.timing.join_timeout, run.handle)
                    .await
                    .map_err(|_| CalibrationError::StopTimeout(self.timing.join_timeout))?;
                let set = joined.map_err(|_| CalibrationError::TaskFailed)??;
                return Ok(ToggleOutcome::Stopped(set));
            }
        }

        *guard = Some(self.spawn_run());
        Ok(ToggleOutcome::Started)
    }
}

/// Background sampling loop.
///
/// Runs until the stop flag is raised or the wall-clock ceiling is reached,
/// whichever comes first; both are checked every tick. A failed fetch leaves
/// the manager's cache untouched, so folding the cache again that tick is a
/// no-op for min/max. Persists before returning.
async fn sample_loop(
    bus: Arc<BusManager>,
    store_path: PathBuf,
    timing: CalibrationTiming,
    stop: watch::Receiver<bool>,
) -> Result<CalibrationSet, CalibrationError> {
    let ids = bus.ids();
    let mut set = CalibrationSet::new(&ids);
    let started = Instant::now();
    let mut tick = time::interval(timing.period);

    loop {
        tick.tick().await;
        if *stop.borrow() {
            info!("Calibration sampling stopped by request");
            break;
        }
        if started.elapsed() >= timing.ceiling {
            info!("Calibration sampling reached its time ceiling");
            break;
        }

        bus.fetch_present_status();
        for (id, position) in bus.present_positions() {
            set.observe(id, position);
        }
    }

    if set.is_empty() {
        warn!("Calibration run observed no samples");
    }
    set.save(&store_path)?;
    Ok(set)
}
