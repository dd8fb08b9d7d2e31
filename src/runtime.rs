// Bridge runtime: 50 Hz joint-state publisher plus the calibration control
// surface, all over one zenoh session.
//
// Two activities share the bus manager here: this publish loop and the
// on-demand calibration sampling task. Both funnel through the manager's
// lock; nothing in this file assumes atomicity across manager calls.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::calibration::{
    CalibrationEngine, CalibrationSet, CalibrationTiming, ToggleOutcome,
};
use crate::config::{
    LOOP_HZ, JOINT_TRANSFORMS, MOTOR_IDS, MOTOR_JOINTS, TOPIC_CAL_STATUS, TOPIC_CAL_TOGGLE,
    TOPIC_ENCODERS, TOPIC_JOINT_STATES, TORQUE_MOTOR_IDS,
};
use crate::joints::{self, JointTable};
use crate::mapping::map_joint_states;
use crate::messages::{CalibrationStatus, CalibrationToggleReply, JointStateSample};
use crate::motor::{BusManager, OperatingMode};

/// Startup options, resolved from the command line
#[derive(Debug, Clone)]
pub struct BridgeOpts {
    pub port: String,
    pub limits_path: PathBuf,
    pub calibration_path: PathBuf,
}

/// Everything the entry points need, owned in one place instead of globals
pub struct BridgeContext {
    pub bus: Arc<BusManager>,
    pub calibration: CalibrationEngine,
    pub table: JointTable,
    /// In-memory copy of the persisted store; replaced when a calibration
    /// run completes so the publish loop never re-reads the file per cycle
    pub calibration_set: RwLock<CalibrationSet>,
}

impl BridgeContext {
    /// Load configuration, open the bus, and configure the motors.
    ///
    /// Any failure here is connection-fatal: the caller terminates instead
    /// of limping along without a working bus or joint table.
    pub fn init(opts: &BridgeOpts) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let limits = joints::load_joint_limits(&opts.limits_path)?;
        let table = joints::build_joint_table(&limits, MOTOR_JOINTS, JOINT_TRANSFORMS)?;
        info!(
            "Bridging {} motors to {} joints",
            MOTOR_IDS.len(),
            table.joint_count()
        );

        let bus = Arc::new(BusManager::open_serial(
            &opts.port,
            &MOTOR_IDS,
            &TORQUE_MOTOR_IDS,
            OperatingMode::Pwm,
        )?);
        bus.setup()?;

        let calibration = CalibrationEngine::new(
            Arc::clone(&bus),
            opts.calibration_path.clone(),
            CalibrationTiming::default(),
        );

        let initial = match CalibrationSet::load(&opts.calibration_path) {
            Ok(set) => set,
            Err(e) => {
                warn!(
                    "No usable calibration store ({}); joints report fallback angles until calibrated",
                    e
                );
                CalibrationSet::new(&MOTOR_IDS)
            }
        };

        Ok(Self {
            bus,
            calibration,
            table,
            calibration_set: RwLock::new(initial),
        })
    }
}

pub async fn run(opts: BridgeOpts) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Arc::new(BridgeContext::init(&opts)?);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    spawn_toggle_handler(&session, Arc::clone(&ctx)).await?;
    spawn_status_handler(&session, Arc::clone(&ctx)).await?;
    spawn_encoder_handler(&session, Arc::clone(&ctx)).await?;

    let publisher = session.declare_publisher(TOPIC_JOINT_STATES).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    // Overdue cycles are skipped, never queued; only an approximate cadence
    // is required
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Bridge started: {}Hz joint-state loop", LOOP_HZ);
    info!("Publishing to: {}", TOPIC_JOINT_STATES);
    info!(
        "Control surface on: {}, {}, {}",
        TOPIC_CAL_TOGGLE, TOPIC_CAL_STATUS, TOPIC_ENCODERS
    );

    loop {
        tick.tick().await;

        // 1. Refresh cached motor state (best effort; stale values survive)
        ctx.bus.fetch_present_status();

        // 2. Map cached ticks into joint angles
        let positions = ctx.bus.present_positions();
        let states = {
            let calibration = ctx.calibration_set.read().await;
            map_joint_states(&positions, &calibration, &ctx.table)
        };

        // 3. Publish one sample per cycle
        let sample = JointStateSample::new(unix_stamp(), states);
        let json = serde_json::to_string(&sample)?;
        publisher.put(json).await?;
    }
}

fn unix_stamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Calibration toggle: start a run, or stop one and wait for its results to
/// be durably persisted before answering.
async fn spawn_toggle_handler(
    session: &zenoh::Session,
    ctx: Arc<BridgeContext>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let queryable = session.declare_queryable(TOPIC_CAL_TOGGLE).await?;

    tokio::spawn(async move {
        while let Ok(query) = queryable.recv_async().await {
            match ctx.calibration.toggle().await {
                Ok(ToggleOutcome::Started) => {
                    reply_json(&query, TOPIC_CAL_TOGGLE, &CalibrationToggleReply::started()).await;
                }
                Ok(ToggleOutcome::Stopped(set)) => {
                    *ctx.calibration_set.write().await = set;
                    reply_json(&query, TOPIC_CAL_TOGGLE, &CalibrationToggleReply::stopped()).await;
                }
                Err(e) => {
                    warn!("Calibration toggle failed: {}", e);
                    if let Err(e) = query.reply_err(e.to_string()).await {
                        warn!("Failed to reply to toggle query: {}", e);
                    }
                }
            }
        }
    });

    Ok(())
}

async fn spawn_status_handler(
    session: &zenoh::Session,
    ctx: Arc<BridgeContext>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let queryable = session.declare_queryable(TOPIC_CAL_STATUS).await?;

    tokio::spawn(async move {
        while let Ok(query) = queryable.recv_async().await {
            let status = CalibrationStatus {
                running: ctx.calibration.is_sampling().await,
            };
            reply_json(&query, TOPIC_CAL_STATUS, &status).await;
        }
    });

    Ok(())
}

/// Raw encoder readout: fetch once, answer with the cached tick counts.
async fn spawn_encoder_handler(
    session: &zenoh::Session,
    ctx: Arc<BridgeContext>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let queryable = session.declare_queryable(TOPIC_ENCODERS).await?;

    tokio::spawn(async move {
        while let Ok(query) = queryable.recv_async().await {
            ctx.bus.fetch_present_status();
            let readout: BTreeMap<String, i32> = ctx
                .bus
                .snapshot()
                .into_iter()
                .map(|status| (format!("motor_{}", status.id), status.position))
                .collect();
            reply_json(&query, TOPIC_ENCODERS, &readout).await;
        }
    });

    Ok(())
}

async fn reply_json<T: serde::Serialize>(query: &zenoh::query::Query, key: &str, value: &T) {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode reply for {}: {}", key, e);
            return;
        }
    };
    if let Err(e) = query.reply(key, json).await {
        warn!("Failed to reply on {}: {}", key, e);
    }
}
