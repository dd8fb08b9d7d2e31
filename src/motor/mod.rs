// Actuator bus module
//
// Provides:
// - Control-table registers, widths, and packet framing
// - A transport seam over the half-duplex serial link
// - The thread-safe bus manager with grouped register transactions

mod manager;
pub mod protocol;
pub mod transport;

pub use manager::{BusManager, MotorChannel, MotorStatus, PidGains};
pub use protocol::{BusError, OperatingMode};
