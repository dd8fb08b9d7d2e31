// Joint mapping pipeline
//
// Converts cached encoder readings into joint angles: clamp into the
// calibrated range, normalize to [0, 1], interpolate into each bound joint's
// angle limits, then apply that joint's affine transform. One motor may fan
// out to several joints, each with its own limits and transform.

use tracing::debug;

use crate::calibration::{CalibrationRecord, CalibrationSet};
use crate::joints::JointTable;

/// Angle reported for a joint whose motor cannot be mapped this cycle
pub const FALLBACK_ANGLE: f64 = 0.0;

/// Normalize a reading against a calibrated range.
///
/// Readings outside the range are clamped, so the ratio is always in [0, 1].
/// Returns `None` for an uncalibrated or degenerate (zero-width) range
/// rather than dividing by zero.
pub fn normalized_ratio(record: CalibrationRecord, ticks: i32) -> Option<f64> {
    let (min, max) = record.range()?;
    if min == max {
        return None;
    }
    let clamped = ticks.clamp(min, max);
    Some((clamped - min) as f64 / (max - min) as f64)
}

/// Map one cycle's cached positions into joint angles.
///
/// Output order is the table's fixed motor order; consumers match by name.
/// Any motor that cannot be mapped (no cached reading, uncalibrated or
/// degenerate range) contributes the fallback angle for each of its joints
/// and never disturbs the remaining motors.
pub fn map_joint_states(
    positions: &std::collections::BTreeMap<u8, i32>,
    calibration: &CalibrationSet,
    table: &JointTable,
) -> Vec<(String, f64)> {
    let mut out = Vec::new();

    for (motor_id, bindings) in table.entries() {
        let ratio = positions
            .get(&motor_id)
            .and_then(|&ticks| normalized_ratio(calibration.record(motor_id), ticks));

        match ratio {
            Some(ratio) => {
                for binding in bindings {
                    let angle = binding.lower + ratio * (binding.upper - binding.lower);
                    let angle = angle * binding.scale + binding.offset;
                    out.push((binding.name.clone(), angle));
                }
            }
            None => {
                debug!(
                    "Motor {} not mappable this cycle, using fallback angle",
                    motor_id
                );
                for binding in bindings {
                    out.push((binding.name.clone(), FALLBACK_ANGLE));
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::JointBinding;
    use std::collections::BTreeMap;

    fn calibrated(id: u8, min: i32, max: i32) -> CalibrationSet {
        let mut set = CalibrationSet::new(&[id]);
        set.observe(id, min);
        set.observe(id, max);
        set
    }

    fn binding(name: &str, lower: f64, upper: f64, scale: f64, offset: f64) -> JointBinding {
        JointBinding {
            name: name.to_string(),
            lower,
            upper,
            scale,
            offset,
        }
    }

    fn table(entries: Vec<(u8, Vec<JointBinding>)>) -> JointTable {
        JointTable::from_entries(entries)
    }

    #[test]
    fn ratio_endpoints_and_monotonicity() {
        let record = CalibrationRecord::Calibrated {
            min: 1000,
            max: 3000,
        };
        assert_eq!(normalized_ratio(record, 1000), Some(0.0));
        assert_eq!(normalized_ratio(record, 3000), Some(1.0));

        let mut last = -1.0;
        for ticks in (1000..=3000).step_by(100) {
            let ratio = normalized_ratio(record, ticks).unwrap();
            assert!((0.0..=1.0).contains(&ratio));
            assert!(ratio >= last);
            last = ratio;
        }
    }

    #[test]
    fn ratio_clamps_out_of_range_readings() {
        let record = CalibrationRecord::Calibrated {
            min: 1000,
            max: 3000,
        };
        assert_eq!(normalized_ratio(record, -500), Some(0.0));
        assert_eq!(normalized_ratio(record, 10_000), Some(1.0));
    }

    #[test]
    fn degenerate_range_yields_none_not_nan() {
        let record = CalibrationRecord::Calibrated {
            min: 2048,
            max: 2048,
        };
        assert_eq!(normalized_ratio(record, 2048), None);
        assert_eq!(normalized_ratio(CalibrationRecord::Uncalibrated, 0), None);
    }

    #[test]
    fn midpoint_reading_maps_to_midpoint_angle() {
        // Ticks 1000..3000, limits [-1, 1], identity transform:
        // reading 2000 -> ratio 0.5 -> angle 0.0
        let table = table(vec![(1, vec![binding("rev1", -1.0, 1.0, 1.0, 0.0)])]);
        let positions = BTreeMap::from([(1u8, 2000)]);

        let states = map_joint_states(&positions, &calibrated(1, 1000, 3000), &table);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, "rev1");
        assert!((states[0].1 - 0.0).abs() < 1e-12);
    }

    #[test]
    fn ratio_endpoints_hit_joint_limits_before_transform() {
        let table = table(vec![(1, vec![binding("rev1", -0.4, 0.9, 1.0, 0.0)])]);
        let cal = calibrated(1, 1000, 3000);

        let low = map_joint_states(&BTreeMap::from([(1u8, 1000)]), &cal, &table);
        assert!((low[0].1 - -0.4).abs() < 1e-12);

        let high = map_joint_states(&BTreeMap::from([(1u8, 3000)]), &cal, &table);
        assert!((high[0].1 - 0.9).abs() < 1e-12);
    }

    #[test]
    fn transform_applied_after_limit_mapping() {
        // scale = -1: reading at min must give -(lower) = +1.0, proving the
        // transform composes after interpolation, never before
        let table = table(vec![(1, vec![binding("rev1", -1.0, 1.0, -1.0, 0.0)])]);
        let cal = calibrated(1, 1000, 3000);

        let at_min = map_joint_states(&BTreeMap::from([(1u8, 1000)]), &cal, &table);
        assert!((at_min[0].1 - 1.0).abs() < 1e-12);

        let mid = map_joint_states(&BTreeMap::from([(1u8, 2000)]), &cal, &table);
        assert!((mid[0].1 - 0.0).abs() < 1e-12);
    }

    #[test]
    fn offset_applied_after_scale() {
        let table = table(vec![(1, vec![binding("pris1", 0.0, 0.1, -1.0, -0.05)])]);
        let cal = calibrated(1, 0, 100);

        // reading 100 -> ratio 1 -> angle 0.1 -> * -1 + -0.05 = -0.15
        let states = map_joint_states(&BTreeMap::from([(1u8, 100)]), &cal, &table);
        assert!((states[0].1 - -0.15).abs() < 1e-12);
    }

    #[test]
    fn fan_out_gives_each_joint_its_own_limits() {
        let table = table(vec![(
            2,
            vec![
                binding("left_pris", 0.0, 0.1, 1.0, 0.0),
                binding("right_pris", -0.2, 0.2, 1.0, 0.0),
            ],
        )]);
        let cal = calibrated(2, 0, 1000);

        let states = map_joint_states(&BTreeMap::from([(2u8, 500)]), &cal, &table);
        assert_eq!(states.len(), 2);
        assert!((states[0].1 - 0.05).abs() < 1e-12);
        assert!((states[1].1 - 0.0).abs() < 1e-12);
        // Each angle within its own joint's bounds
        assert!(states[0].1 >= 0.0 && states[0].1 <= 0.1);
        assert!(states[1].1 >= -0.2 && states[1].1 <= 0.2);
    }

    #[test]
    fn uncalibrated_motor_gets_fallback_for_all_its_joints() {
        let table = table(vec![(
            1,
            vec![
                binding("a", -1.0, 1.0, 1.0, 0.0),
                binding("b", 0.0, 2.0, 1.0, 0.0),
            ],
        )]);
        let cal = CalibrationSet::new(&[1]);

        let states = map_joint_states(&BTreeMap::from([(1u8, 2000)]), &cal, &table);
        assert_eq!(states, vec![("a".to_string(), 0.0), ("b".to_string(), 0.0)]);
    }

    #[test]
    fn failed_motor_does_not_disturb_siblings() {
        let table = table(vec![
            (1, vec![binding("a", -1.0, 1.0, 1.0, 0.0)]),
            (2, vec![binding("b", -1.0, 1.0, 1.0, 0.0)]),
        ]);
        let mut cal = calibrated(2, 0, 1000);
        cal.observe(1, 500); // degenerate single-sample range for motor 1

        // Motor 1 degenerate, motor 2 healthy at its midpoint
        let positions = BTreeMap::from([(1u8, 500), (2u8, 500)]);
        let states = map_joint_states(&positions, &cal, &table);

        assert_eq!(states[0], ("a".to_string(), FALLBACK_ANGLE));
        assert!((states[1].1 - 0.0).abs() < 1e-12);

        // And with motor 1 missing entirely (failed read), motor 2 unchanged
        let positions = BTreeMap::from([(2u8, 500)]);
        let states = map_joint_states(&positions, &cal, &table);
        assert_eq!(states[0], ("a".to_string(), FALLBACK_ANGLE));
        assert!((states[1].1 - 0.0).abs() < 1e-12);
    }

    #[test]
    fn output_order_follows_table_order() {
        let table = table(vec![
            (10, vec![binding("x", 0.0, 1.0, 1.0, 0.0)]),
            (2, vec![binding("y", 0.0, 1.0, 1.0, 0.0)]),
        ]);
        let mut cal = calibrated(10, 0, 100);
        cal.observe(2, 0);
        cal.observe(2, 100);

        let positions = BTreeMap::from([(2u8, 50), (10u8, 50)]);
        let states = map_joint_states(&positions, &cal, &table);
        let names: Vec<&str> = states.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }
}
