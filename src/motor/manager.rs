// Actuator bus manager
//
// Owns the serial transport and all per-motor runtime state behind one lock.
// The bus is half-duplex: interleaved transactions corrupt the wire, so every
// public operation holds the lock for its full duration.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use super::protocol::{
    OperatingMode, Register, RegisterValue, Result, STATUS_BLOCK_LEN, STATUS_POSITION_OFFSET,
};
use super::transport::{BusTransport, SerialBus};

/// Position PID gains written to each motor during setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidGains {
    pub p: u16,
    pub i: u16,
    pub d: u16,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            p: 100,
            i: 10,
            d: 1000,
        }
    }
}

/// Runtime state for one motor on the bus
#[derive(Debug, Clone)]
pub struct MotorChannel {
    pub id: u8,
    pub torque_enabled: bool,
    pub mode: OperatingMode,
    pub gains: PidGains,
    pub present_position: i32,
    pub present_current: i16,
    pub goal_position: Option<i32>,
    pub goal_current: Option<i32>,
    pub goal_pwm: Option<i32>,
}

impl MotorChannel {
    fn new(id: u8, mode: OperatingMode) -> Self {
        Self {
            id,
            torque_enabled: false,
            mode,
            gains: PidGains::default(),
            present_position: 0,
            present_current: 0,
            goal_position: None,
            goal_current: None,
            goal_pwm: None,
        }
    }
}

/// Cached status of one motor, as of the last successful fetch
#[derive(Debug, Clone, Copy)]
pub struct MotorStatus {
    pub id: u8,
    pub position: i32,
    pub current: i16,
}

struct BusInner {
    bus: Box<dyn BusTransport>,
    motors: Vec<MotorChannel>,
    torque_ids: Vec<u8>,
}

/// Thread-safe manager for the multi-motor actuator bus
pub struct BusManager {
    inner: Mutex<BusInner>,
}

impl BusManager {
    /// Assemble a manager over an already-open transport.
    pub fn open(
        transport: Box<dyn BusTransport>,
        ids: &[u8],
        torque_ids: &[u8],
        mode: OperatingMode,
    ) -> Self {
        let motors = ids.iter().map(|&id| MotorChannel::new(id, mode)).collect();
        Self {
            inner: Mutex::new(BusInner {
                bus: transport,
                motors,
                torque_ids: torque_ids.to_vec(),
            }),
        }
    }

    /// Open the serial link and assemble a manager over it.
    ///
    /// A failed open or baud negotiation is unrecoverable for the process;
    /// the caller decides how to surface it.
    pub fn open_serial(
        port: &str,
        ids: &[u8],
        torque_ids: &[u8],
        mode: OperatingMode,
    ) -> Result<Self> {
        info!("Opening actuator bus on {}", port);
        let transport = SerialBus::open(port)?;
        Ok(Self::open(Box::new(transport), ids, torque_ids, mode))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        // Poisoning is recovered: the torque-off safety path runs during
        // unwinds and must still reach the bus
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Configure every managed motor for operation.
    ///
    /// Per motor: disable torque, set the operating mode, write PID gains,
    /// then re-enable torque only for ids in the torque-enabled set. The
    /// hardware rejects mode writes while torque is on, so the disable must
    /// come first.
    pub fn setup(&self) -> Result<()> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        info!(
            "Setting up motors {:?} (torque enabled on {:?})",
            inner.motors.iter().map(|m| m.id).collect::<Vec<_>>(),
            inner.torque_ids
        );

        for motor in &mut inner.motors {
            inner.bus.write_register(
                motor.id,
                Register::TorqueEnable,
                RegisterValue::OneByte(0),
            )?;
            motor.torque_enabled = false;

            inner.bus.write_register(
                motor.id,
                Register::OperatingMode,
                RegisterValue::OneByte(motor.mode as u8),
            )?;

            inner.bus.write_register(
                motor.id,
                Register::PositionDGain,
                RegisterValue::TwoByte(motor.gains.d),
            )?;
            inner.bus.write_register(
                motor.id,
                Register::PositionIGain,
                RegisterValue::TwoByte(motor.gains.i),
            )?;
            inner.bus.write_register(
                motor.id,
                Register::PositionPGain,
                RegisterValue::TwoByte(motor.gains.p),
            )?;

            if inner.torque_ids.contains(&motor.id) {
                inner.bus.write_register(
                    motor.id,
                    Register::TorqueEnable,
                    RegisterValue::OneByte(1),
                )?;
                motor.torque_enabled = true;
            }
        }

        info!("Motors set up successfully");
        Ok(())
    }

    /// Refresh the cached present current and position of every motor in one
    /// grouped read.
    ///
    /// Telemetry is best-effort: on a communication failure the cache keeps
    /// its previous values and no error reaches the caller. Motors missing
    /// from the reply are skipped the same way.
    pub fn fetch_present_status(&self) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let ids: Vec<u8> = inner.motors.iter().map(|m| m.id).collect();

        let blocks = match inner
            .bus
            .sync_read(Register::PresentCurrent, STATUS_BLOCK_LEN, &ids)
        {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("Grouped status read failed, keeping cached values: {}", e);
                return;
            }
        };

        for motor in &mut inner.motors {
            let Some(block) = blocks.get(&motor.id) else {
                continue;
            };
            motor.present_current = i16::from_le_bytes([block[0], block[1]]);
            motor.present_position = i32::from_le_bytes([
                block[STATUS_POSITION_OFFSET],
                block[STATUS_POSITION_OFFSET + 1],
                block[STATUS_POSITION_OFFSET + 2],
                block[STATUS_POSITION_OFFSET + 3],
            ]);
        }
    }

    /// Send goal positions in one grouped write (4-byte little-endian).
    pub fn set_goal_positions(&self, goals: &[(u8, i32)]) {
        let mut inner = self.lock();
        inner.grouped_goal_write(Register::GoalPosition, goals);
    }

    /// Send goal currents in one grouped write (2-byte little-endian).
    ///
    /// A goal outside the register's range is dropped from the transaction
    /// while the rest still transmit; callers must not assume all-or-nothing
    /// semantics across ids.
    pub fn set_goal_currents(&self, goals: &[(u8, i32)]) {
        let mut inner = self.lock();
        inner.grouped_goal_write(Register::GoalCurrent, goals);
    }

    /// Send goal PWM duty values in one grouped write (2-byte little-endian).
    pub fn set_goal_pwms(&self, goals: &[(u8, i32)]) {
        let mut inner = self.lock();
        inner.grouped_goal_write(Register::GoalPwm, goals);
    }

    /// Send goal positions and goal currents as two grouped writes under one
    /// locked section.
    pub fn set_goal_positions_currents(&self, goals: &[(u8, i32, i32)]) {
        let mut inner = self.lock();
        let positions: Vec<(u8, i32)> = goals.iter().map(|&(id, p, _)| (id, p)).collect();
        let currents: Vec<(u8, i32)> = goals.iter().map(|&(id, _, c)| (id, c)).collect();
        inner.grouped_goal_write(Register::GoalPosition, &positions);
        inner.grouped_goal_write(Register::GoalCurrent, &currents);
    }

    /// Disable torque with one unbatched register write per id.
    ///
    /// This is the safety path: a failed write is logged and the remaining
    /// ids are still attempted.
    pub fn disable_torque(&self, ids: &[u8]) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        for &id in ids {
            match inner
                .bus
                .write_register(id, Register::TorqueEnable, RegisterValue::OneByte(0))
            {
                Ok(()) => {
                    if let Some(motor) = inner.motors.iter_mut().find(|m| m.id == id) {
                        motor.torque_enabled = false;
                    }
                }
                Err(e) => warn!("Failed to disable torque on motor {}: {}", id, e),
            }
        }
    }

    /// Cached present positions keyed by motor id.
    pub fn present_positions(&self) -> BTreeMap<u8, i32> {
        self.lock()
            .motors
            .iter()
            .map(|m| (m.id, m.present_position))
            .collect()
    }

    /// Cached status of every managed motor, in id order of configuration.
    pub fn snapshot(&self) -> Vec<MotorStatus> {
        self.lock()
            .motors
            .iter()
            .map(|m| MotorStatus {
                id: m.id,
                position: m.present_position,
                current: m.present_current,
            })
            .collect()
    }

    /// Ids of the managed motors, in configuration order.
    pub fn ids(&self) -> Vec<u8> {
        self.lock().motors.iter().map(|m| m.id).collect()
    }
}

impl BusInner {
    /// Pack and transmit one grouped goal write.
    ///
    /// Unknown ids and values that do not fit the register width are dropped
    /// from the transaction (logged); the remaining frames still go out.
    /// Transmit failures are absorbed here so telemetry-style callers never
    /// see them.
    fn grouped_goal_write(&mut self, register: Register, goals: &[(u8, i32)]) {
        let width = register.width();
        let mut frames = Vec::with_capacity(goals.len());

        for &(id, value) in goals {
            let Some(motor) = self.motors.iter_mut().find(|m| m.id == id) else {
                warn!("Dropping goal for unmanaged motor {}", id);
                continue;
            };
            let Some(payload) = width.pack_goal(value) else {
                warn!(
                    "Goal {} does not fit {:?} for motor {}, dropping from transaction",
                    value, register, id
                );
                continue;
            };
            match register {
                Register::GoalPosition => motor.goal_position = Some(value),
                Register::GoalCurrent => motor.goal_current = Some(value),
                Register::GoalPwm => motor.goal_pwm = Some(value),
                _ => {}
            }
            frames.push((id, payload));
        }

        debug!(
            "Grouped write reg={:?}: {} of {} goals packed",
            register,
            frames.len(),
            goals.len()
        );
        if let Err(e) = self.bus.sync_write(register, &frames) {
            warn!("Grouped write failed for reg={:?}: {}", register, e);
        }
    }
}

impl Drop for BusManager {
    fn drop(&mut self) {
        // Leave the arm passively compliant when the manager goes away
        let ids = self.ids();
        self.disable_torque(&ids);
    }
}
