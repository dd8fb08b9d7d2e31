// Message types carried over zenoh

use serde::{Deserialize, Serialize};

/// One publish cycle's joint angles: parallel name/position sequences plus a
/// UNIX timestamp in seconds (mirrors the JointState shape consumers expect)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointStateSample {
    pub stamp: f64,
    pub name: Vec<String>,
    pub position: Vec<f64>,
}

impl JointStateSample {
    pub fn new(stamp: f64, states: Vec<(String, f64)>) -> Self {
        let (name, position) = states.into_iter().unzip();
        Self {
            stamp,
            name,
            position,
        }
    }
}

/// Reply to a calibration toggle request: `{"status": "started"|"stopped"}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalibrationToggleReply {
    pub status: ToggleStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ToggleStatus {
    Started,
    Stopped,
}

impl CalibrationToggleReply {
    pub fn started() -> Self {
        Self {
            status: ToggleStatus::Started,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ToggleStatus::Stopped,
        }
    }
}

/// Calibration status for the control surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub running: bool,
}
