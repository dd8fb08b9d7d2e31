// Timing, topics, and arm configuration
use std::time::Duration;

// Publish loop frequency (joint states)
pub const LOOP_HZ: u64 = 50;

// Zenoh topics
pub const TOPIC_JOINT_STATES: &str = "openarm/state/joints"; // joint angles out
pub const TOPIC_CAL_TOGGLE: &str = "openarm/ctl/calibration/toggle"; // start/stop
pub const TOPIC_CAL_STATUS: &str = "openarm/ctl/calibration/status"; // running?
pub const TOPIC_ENCODERS: &str = "openarm/ctl/encoders"; // raw readout

// Serial port for the actuator bus
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

// Default file locations
pub const DEFAULT_LIMITS_PATH: &str = "config/joint_limits.json";
pub const DEFAULT_CALIBRATION_PATH: &str = "calibration.json";

// Calibration sampling: 1 s period under a 10 s run ceiling; stop requests
// wait at most this long for the sampling task to exit and persist.
pub const CALIBRATION_SAMPLE_PERIOD: Duration = Duration::from_secs(1);
pub const CALIBRATION_CEILING: Duration = Duration::from_secs(10);
pub const CALIBRATION_JOIN_TIMEOUT: Duration = Duration::from_secs(15);

// Motor ids on the bus, starting from the wrist. Iteration order here fixes
// the order of the published joint sequence.
pub const MOTOR_IDS: [u8; 6] = [0, 1, 2, 10, 11, 12];

// Motors that actively hold their goal; the rest stay passively compliant
pub const TORQUE_MOTOR_IDS: [u8; 6] = [0, 1, 2, 10, 11, 12];

// Which joints each motor drives. Ids 2 and 12 fan out to a prismatic pair.
pub const MOTOR_JOINTS: &[(u8, &[&str])] = &[
    (0, &["left_rev6"]),
    (1, &["left_rev7"]),
    (2, &["left_left_pris1", "left_right_pris2"]),
    (10, &["right_rev6"]),
    (11, &["right_rev7"]),
    (12, &["right_left_pris1", "right_right_pris2"]),
];

// Per-joint affine corrections (scale, offset) applied after limit mapping;
// joints not listed here use the identity.
pub const JOINT_TRANSFORMS: &[(&str, f64, f64)] = &[
    ("right_rev6", -1.0, 0.0),
    ("left_rev6", -1.0, 0.0),
    ("left_right_pris2", -1.0, 0.0),
    ("right_left_pris1", -1.0, -0.05),
    ("right_right_pris2", 1.0, 0.05),
];
