// Joint configuration
//
// Joint angle limits arrive pre-extracted from the robot description as a
// JSON file (name -> {lower, upper} in radians), loaded once at startup and
// joined with the static motor-to-joint binding and transform tables.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

/// Angle limits for one joint, radians
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct JointLimit {
    pub lower: f64,
    pub upper: f64,
}

/// One joint driven by a motor: limits plus its affine transform
#[derive(Debug, Clone)]
pub struct JointBinding {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub scale: f64,
    pub offset: f64,
}

/// Immutable motor-to-joint table, iterated in fixed configuration order
#[derive(Debug, Clone, Default)]
pub struct JointTable {
    entries: Vec<(u8, Vec<JointBinding>)>,
}

impl JointTable {
    pub fn from_entries(entries: Vec<(u8, Vec<JointBinding>)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> impl Iterator<Item = (u8, &[JointBinding])> {
        self.entries.iter().map(|(id, b)| (*id, b.as_slice()))
    }

    pub fn joint_count(&self) -> usize {
        self.entries.iter().map(|(_, b)| b.len()).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JointConfigError {
    #[error("Failed to read joint limits file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Joint limits file is malformed: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Joint '{joint}' is bound to a motor but has no angle limits")]
    MissingLimit { joint: String },
}

/// Load the joint-limit table from its JSON file.
pub fn load_joint_limits(path: &Path) -> Result<HashMap<String, JointLimit>, JointConfigError> {
    let json = std::fs::read_to_string(path)?;
    let limits: HashMap<String, JointLimit> = serde_json::from_str(&json)?;
    info!(
        "Loaded angle limits for {} joints from {}",
        limits.len(),
        path.display()
    );
    Ok(limits)
}

/// Join the binding and transform tables with the loaded limits.
///
/// Every bound joint must have limits; a missing entry is fatal at startup
/// rather than a silent wrong angle at runtime.
pub fn build_joint_table(
    limits: &HashMap<String, JointLimit>,
    bindings: &[(u8, &[&str])],
    transforms: &[(&str, f64, f64)],
) -> Result<JointTable, JointConfigError> {
    let mut entries = Vec::with_capacity(bindings.len());

    for &(motor_id, joints) in bindings {
        let mut bound = Vec::with_capacity(joints.len());
        for &name in joints {
            let limit = limits
                .get(name)
                .ok_or_else(|| JointConfigError::MissingLimit {
                    joint: name.to_string(),
                })?;
            let (scale, offset) = transforms
                .iter()
                .find(|(joint, _, _)| *joint == name)
                .map(|&(_, scale, offset)| (scale, offset))
                .unwrap_or((1.0, 0.0));
            bound.push(JointBinding {
                name: name.to_string(),
                lower: limit.lower,
                upper: limit.upper,
                scale,
                offset,
            });
        }
        entries.push((motor_id, bound));
    }

    Ok(JointTable::from_entries(entries))
}
