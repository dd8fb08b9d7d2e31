// Transport layer for the actuator bus
//
// `BusTransport` is the seam between the bus manager and the wire: the
// manager only speaks in register transactions, never raw bytes. `SerialBus`
// is the hardware implementation over a half-duplex serial link.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::Duration;

use serialport::{self, SerialPort};
use tracing::debug;

use super::protocol::{
    build_packet, BusError, Instruction, Register, RegisterValue, Result, BROADCAST_ID,
    DEFAULT_BAUDRATE, DEFAULT_TIMEOUT_MS, HEADER,
};

/// Register-transaction interface to the actuator bus.
pub trait BusTransport: Send {
    /// Write one register on one motor and wait for its status reply.
    fn write_register(&mut self, id: u8, register: Register, value: RegisterValue) -> Result<()>;

    /// Grouped write: one bus round trip carrying a pre-packed payload per
    /// motor. All payloads must match the register's width.
    fn sync_write(&mut self, register: Register, frames: &[(u8, Vec<u8>)]) -> Result<()>;

    /// Grouped read of `len` bytes starting at `start` from every id.
    ///
    /// Motors that fail to answer are absent from the result map; the map
    /// itself is only an error when the request could not be transmitted.
    fn sync_read(&mut self, start: Register, len: u8, ids: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>>;
}

/// Serial implementation of the bus transport
pub struct SerialBus {
    port: Box<dyn SerialPort>,
}

impl SerialBus {
    /// Open a new connection to the actuator bus
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one status packet and return its parameter bytes
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BusError::Timeout { id: expected_id }
            } else {
                BusError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != expected_id {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }

        // error byte + params + checksum = length bytes
        let mut remaining = vec![0u8; length];
        self.port.read_exact(&mut remaining)?;

        let mut body = vec![id, length as u8];
        body.extend_from_slice(&remaining[..remaining.len() - 1]);
        let expected_checksum = super::protocol::checksum(&body);
        let received_checksum = remaining[remaining.len() - 1];

        if expected_checksum != received_checksum {
            return Err(BusError::ChecksumMismatch { id });
        }

        let error_status = remaining[0];
        if error_status != 0 {
            return Err(BusError::MotorError {
                id,
                status: error_status,
            });
        }

        Ok(remaining[1..remaining.len() - 1].to_vec())
    }
}

impl BusTransport for SerialBus {
    fn write_register(&mut self, id: u8, register: Register, value: RegisterValue) -> Result<()> {
        debug_assert_eq!(value.width(), register.width());

        let mut params = vec![register.addr()];
        params.extend_from_slice(&value.to_le_bytes());
        let packet = build_packet(id, Instruction::Write, &params);
        debug!("Write to motor {}: reg={:?}, value={:?}", id, register, value);
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    fn sync_write(&mut self, register: Register, frames: &[(u8, Vec<u8>)]) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }

        // [start_addr, data_len, id1, data1..., id2, data2..., ...]
        let data_len = register.width().size() as u8;
        let mut params = vec![register.addr(), data_len];
        for (id, payload) in frames {
            params.push(*id);
            params.extend_from_slice(payload);
        }

        let packet = build_packet(BROADCAST_ID, Instruction::SyncWrite, &params);
        debug!("Sync write to {} motors: reg={:?}", frames.len(), register);
        self.send_packet(&packet)?;

        // Sync write has no response
        Ok(())
    }

    fn sync_read(&mut self, start: Register, len: u8, ids: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>> {
        // [start_addr, read_len, id1, id2, ...]
        let mut params = vec![start.addr(), len];
        params.extend_from_slice(ids);

        let packet = build_packet(BROADCAST_ID, Instruction::SyncRead, &params);
        self.send_packet(&packet)?;

        // Each addressed motor answers in id order with one status packet.
        // A motor that stays silent is skipped; the rest still count.
        let mut blocks = BTreeMap::new();
        for &id in ids {
            match self.read_response(id) {
                Ok(block) if block.len() == len as usize => {
                    blocks.insert(id, block);
                }
                Ok(block) => {
                    debug!(
                        "Motor {} returned short status block ({} of {} bytes)",
                        id,
                        block.len(),
                        len
                    );
                }
                Err(BusError::Timeout { .. }) => {
                    debug!("Motor {} did not answer sync read", id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(blocks)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for driving the manager and calibration engine in
    //! tests. Positions are scripted per motor; failures are switchable.

    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::super::protocol::{
        BusError, Register, RegisterValue, Result, STATUS_BLOCK_LEN, STATUS_POSITION_OFFSET,
    };
    use super::BusTransport;

    /// One recorded register transaction
    #[derive(Debug, Clone, PartialEq)]
    pub enum BusOp {
        Write {
            id: u8,
            register: Register,
            value: RegisterValue,
        },
        SyncWrite {
            register: Register,
            frames: Vec<(u8, Vec<u8>)>,
        },
        SyncRead {
            start: Register,
            ids: Vec<u8>,
        },
    }

    #[derive(Default)]
    struct MockState {
        positions: BTreeMap<u8, i32>,
        currents: BTreeMap<u8, i16>,
        silent_ids: Vec<u8>,
        ops: Vec<BusOp>,
    }

    #[derive(Clone, Default)]
    pub struct MockBus {
        state: Arc<Mutex<MockState>>,
        fail_reads: Arc<AtomicBool>,
        fail_writes: Arc<AtomicBool>,
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_position(&self, id: u8, ticks: i32) {
            self.state.lock().unwrap().positions.insert(id, ticks);
        }

        pub fn set_current(&self, id: u8, current: i16) {
            self.state.lock().unwrap().currents.insert(id, current);
        }

        /// Make one motor stop answering grouped reads.
        pub fn silence(&self, id: u8) {
            self.state.lock().unwrap().silent_ids.push(id);
        }

        /// Fail every grouped read at the transmit stage.
        pub fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn ops(&self) -> Vec<BusOp> {
            self.state.lock().unwrap().ops.clone()
        }
    }

    impl BusTransport for MockBus {
        fn write_register(
            &mut self,
            id: u8,
            register: Register,
            value: RegisterValue,
        ) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(BusError::Timeout { id });
            }
            self.state.lock().unwrap().ops.push(BusOp::Write {
                id,
                register,
                value,
            });
            Ok(())
        }

        fn sync_write(&mut self, register: Register, frames: &[(u8, Vec<u8>)]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(BusError::Timeout { id: 0xFE });
            }
            self.state.lock().unwrap().ops.push(BusOp::SyncWrite {
                register,
                frames: frames.to_vec(),
            });
            Ok(())
        }

        fn sync_read(
            &mut self,
            start: Register,
            len: u8,
            ids: &[u8],
        ) -> Result<BTreeMap<u8, Vec<u8>>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(BusError::Timeout { id: 0xFE });
            }
            assert_eq!(len, STATUS_BLOCK_LEN);

            let mut state = self.state.lock().unwrap();
            state.ops.push(BusOp::SyncRead {
                start,
                ids: ids.to_vec(),
            });

            let mut blocks = BTreeMap::new();
            for &id in ids {
                if state.silent_ids.contains(&id) {
                    continue;
                }
                let position = state.positions.get(&id).copied().unwrap_or(0);
                let current = state.currents.get(&id).copied().unwrap_or(0);
                let mut block = vec![0u8; len as usize];
                block[..2].copy_from_slice(&current.to_le_bytes());
                block[STATUS_POSITION_OFFSET..STATUS_POSITION_OFFSET + 4]
                    .copy_from_slice(&position.to_le_bytes());
                blocks.insert(id, block);
            }
            Ok(blocks)
        }
    }
}
