// Serial bus protocol for the arm's X-series actuators
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Sync read/write instructions address the broadcast ID and carry one
// register block per motor in a single bus round trip.

/// Default serial configuration for the actuator bus
pub const DEFAULT_BAUDRATE: u32 = 57_600;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
pub(crate) const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Broadcast ID used by sync read/write
pub(crate) const BROADCAST_ID: u8 = 0xFE;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncRead = 0x82,
    SyncWrite = 0x83,
}

/// Control table registers used by this arm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    OperatingMode,
    TorqueEnable,
    PositionDGain,
    PositionIGain,
    PositionPGain,
    GoalPwm,
    GoalCurrent,
    GoalPosition,
    PresentCurrent,
    PresentPosition,
}

impl Register {
    pub fn addr(self) -> u8 {
        match self {
            Register::OperatingMode => 11,
            Register::TorqueEnable => 64,
            Register::PositionDGain => 80,
            Register::PositionIGain => 82,
            Register::PositionPGain => 84,
            Register::GoalPwm => 100,
            Register::GoalCurrent => 102,
            Register::GoalPosition => 116,
            Register::PresentCurrent => 126,
            Register::PresentPosition => 132,
        }
    }

    pub fn width(self) -> RegisterWidth {
        match self {
            Register::OperatingMode | Register::TorqueEnable => RegisterWidth::OneByte,
            Register::PositionDGain
            | Register::PositionIGain
            | Register::PositionPGain
            | Register::GoalPwm
            | Register::GoalCurrent
            | Register::PresentCurrent => RegisterWidth::TwoByte,
            Register::GoalPosition | Register::PresentPosition => RegisterWidth::FourByte,
        }
    }
}

/// Size of the contiguous status block read by the grouped fetch:
/// present current (2 bytes @ 126) through present position (4 bytes @ 132).
pub const STATUS_BLOCK_LEN: u8 = 10;
/// Byte offset of the present position within the status block.
pub const STATUS_POSITION_OFFSET: usize = 6;

/// Register widths supported by the control table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    OneByte,
    TwoByte,
    FourByte,
}

impl RegisterWidth {
    pub fn size(self) -> usize {
        match self {
            RegisterWidth::OneByte => 1,
            RegisterWidth::TwoByte => 2,
            RegisterWidth::FourByte => 4,
        }
    }

    /// Pack a signed goal value into this width, little-endian.
    ///
    /// Returns `None` when the value does not fit the register, so callers
    /// can drop that motor from a grouped write instead of truncating.
    pub fn pack_goal(self, value: i32) -> Option<Vec<u8>> {
        match self {
            RegisterWidth::OneByte => i8::try_from(value)
                .ok()
                .map(|v| v.to_le_bytes().to_vec()),
            RegisterWidth::TwoByte => i16::try_from(value)
                .ok()
                .map(|v| v.to_le_bytes().to_vec()),
            RegisterWidth::FourByte => Some(value.to_le_bytes().to_vec()),
        }
    }
}

/// A value tagged with its register width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    OneByte(u8),
    TwoByte(u16),
    FourByte(u32),
}

impl RegisterValue {
    pub fn width(self) -> RegisterWidth {
        match self {
            RegisterValue::OneByte(_) => RegisterWidth::OneByte,
            RegisterValue::TwoByte(_) => RegisterWidth::TwoByte,
            RegisterValue::FourByte(_) => RegisterWidth::FourByte,
        }
    }

    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            RegisterValue::OneByte(v) => vec![v],
            RegisterValue::TwoByte(v) => v.to_le_bytes().to_vec(),
            RegisterValue::FourByte(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// Operating modes from the control table
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Current = 0,
    ExtendedPosition = 4,
    CurrentBasedPosition = 5,
    Pwm = 16,
}

/// Error types for bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Calculate checksum over a packet body (everything after the header)
pub(crate) fn checksum(data: &[u8]) -> u8 {
    let sum: u16 = data.iter().map(|&b| b as u16).sum();
    (!sum & 0xFF) as u8
}

/// Build a packet with header and checksum
pub(crate) fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let length = (params.len() + 2) as u8; // instruction + checksum
    let mut packet = Vec::with_capacity(6 + params.len());

    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(length);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);

    // Checksum over id, length, instruction, params
    let body = &packet[2..];
    packet.push(checksum(body));

    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        let data = [1u8, 4, 0x03, 30, 0, 2];
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(checksum(&data), 215);
    }

    #[test]
    fn test_build_packet() {
        let packet = build_packet(1, Instruction::Ping, &[]);
        assert_eq!(packet.len(), 6);
        assert_eq!(packet[0], 0xFF);
        assert_eq!(packet[1], 0xFF);
        assert_eq!(packet[2], 1); // ID
        assert_eq!(packet[3], 2); // Length
        assert_eq!(packet[4], 0x01); // PING
    }

    #[test]
    fn test_register_widths() {
        assert_eq!(Register::TorqueEnable.width().size(), 1);
        assert_eq!(Register::GoalCurrent.width().size(), 2);
        assert_eq!(Register::GoalPosition.width().size(), 4);
        assert_eq!(Register::PresentPosition.addr(), 132);
    }

    #[test]
    fn test_pack_goal_little_endian() {
        assert_eq!(
            RegisterWidth::FourByte.pack_goal(0x0403_0201),
            Some(vec![0x01, 0x02, 0x03, 0x04])
        );
        assert_eq!(RegisterWidth::TwoByte.pack_goal(-2), Some(vec![0xFE, 0xFF]));
        assert_eq!(
            RegisterWidth::FourByte.pack_goal(-1),
            Some(vec![0xFF, 0xFF, 0xFF, 0xFF])
        );
    }

    #[test]
    fn test_pack_goal_out_of_range() {
        // i16 range is -32768..=32767; wider values must not be truncated
        assert_eq!(RegisterWidth::TwoByte.pack_goal(40_000), None);
        assert_eq!(RegisterWidth::TwoByte.pack_goal(-40_000), None);
        assert_eq!(RegisterWidth::OneByte.pack_goal(300), None);
    }

    #[test]
    fn test_register_value_encoding() {
        assert_eq!(RegisterValue::OneByte(1).to_le_bytes(), vec![1]);
        assert_eq!(
            RegisterValue::TwoByte(0x0201).to_le_bytes(),
            vec![0x01, 0x02]
        );
        assert_eq!(
            RegisterValue::FourByte(0x0403_0201).to_le_bytes(),
            vec![0x01, 0x02, 0x03, 0x04]
        );
    }
}
