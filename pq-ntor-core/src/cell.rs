//! Tor cell protocol (C3).
//!
//! Fixed and variable cell serialization, RELAY sub-cell pack/unpack,
//! command-tag enums, and the specialized builders/parsers spec §4.2
//! names: CREATE2/CREATED2/DESTROY/RELAY/RELAY_EARLY and the EXTEND2
//! payload used to carry a handshake one hop further.

use crate::error::{Result, TorError};
use std::io::{Read, Write};

/// Fixed cell size, header + payload (spec §3: 2048 total, to fit a
/// post-quantum onionskin in a single cell).
pub const CELL_LEN: usize = 2048;
pub const CELL_HEADER_LEN: usize = 5; // circ_id(4) + command(1)
pub const CELL_PAYLOAD_LEN: usize = CELL_LEN - CELL_HEADER_LEN;

pub const VAR_CELL_HEADER_LEN: usize = 7; // circ_id(4) + command(1) + length(2)

/// Handshake type tag used in CREATE2/EXTEND2 by every variant in this
/// system (spec §6: a production deployment would assign distinct tags).
pub const HANDSHAKE_TYPE_NTOR: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellCommand {
    Padding = 0,
    Create = 1,
    Created = 2,
    Relay = 3,
    Destroy = 4,
    CreateFast = 5,
    CreatedFast = 6,
    Versions = 7,
    Netinfo = 8,
    RelayEarly = 9,
    Create2 = 10,
    Created2 = 11,
    PaddingNegotiate = 12,
}

impl CellCommand {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Padding,
            1 => Self::Create,
            2 => Self::Created,
            3 => Self::Relay,
            4 => Self::Destroy,
            5 => Self::CreateFast,
            6 => Self::CreatedFast,
            7 => Self::Versions,
            8 => Self::Netinfo,
            9 => Self::RelayEarly,
            10 => Self::Create2,
            11 => Self::Created2,
            12 => Self::PaddingNegotiate,
            _ => return None,
        })
    }

    /// Whether this command is carried on a variable-length cell.
    pub fn is_variable_length(self) -> bool {
        matches!(self, Self::Versions | Self::PaddingNegotiate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayCommand {
    Begin = 1,
    Data = 2,
    End = 3,
    Connected = 4,
    SendMe = 5,
    Extend = 6,
    Extended = 7,
    Truncate = 8,
    Truncated = 9,
    Drop = 10,
    Resolve = 11,
    Resolved = 12,
    BeginDir = 13,
    Extend2 = 14,
    Extended2 = 15,
}

impl RelayCommand {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Begin,
            2 => Self::Data,
            3 => Self::End,
            4 => Self::Connected,
            5 => Self::SendMe,
            6 => Self::Extend,
            7 => Self::Extended,
            8 => Self::Truncate,
            9 => Self::Truncated,
            10 => Self::Drop,
            11 => Self::Resolve,
            12 => Self::Resolved,
            13 => Self::BeginDir,
            14 => Self::Extend2,
            15 => Self::Extended2,
            _ => return None,
        })
    }
}

/// DESTROY cell reason codes (full enumeration, recovered from the
/// original C prototype's `cell.h`; spec §4.2 only gives the range).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DestroyReason {
    None = 0,
    Protocol = 1,
    Internal = 2,
    Requested = 3,
    Hibernating = 4,
    ResourceLimit = 5,
    ConnectFailed = 6,
    OrIdentity = 7,
    OrConnClosed = 8,
    Finished = 9,
    Timeout = 10,
    Destroyed = 11,
    NoSuchService = 12,
}

impl From<u8> for DestroyReason {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Protocol,
            2 => Self::Internal,
            3 => Self::Requested,
            4 => Self::Hibernating,
            5 => Self::ResourceLimit,
            6 => Self::ConnectFailed,
            7 => Self::OrIdentity,
            8 => Self::OrConnClosed,
            9 => Self::Finished,
            10 => Self::Timeout,
            11 => Self::Destroyed,
            12 => Self::NoSuchService,
            _ => Self::None,
        }
    }
}

/// A fixed-length cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub circuit_id: u32,
    pub command: CellCommand,
    pub payload: Vec<u8>,
}

impl Cell {
    pub fn new(circuit_id: u32, command: CellCommand, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > CELL_PAYLOAD_LEN {
            return Err(TorError::Protocol(format!(
                "cell payload too large: {} > {}",
                payload.len(),
                CELL_PAYLOAD_LEN
            )));
        }
        Ok(Self {
            circuit_id,
            command,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CELL_LEN);
        buf.extend_from_slice(&self.circuit_id.to_be_bytes());
        buf.push(self.command as u8);
        buf.extend_from_slice(&self.payload);
        buf.resize(CELL_LEN, 0);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < CELL_LEN {
            return Err(TorError::Protocol("cell too short".into()));
        }
        let circuit_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let command = CellCommand::from_u8(data[4])
            .ok_or_else(|| TorError::Protocol(format!("unknown cell command {}", data[4])))?;
        Ok(Self {
            circuit_id,
            command,
            payload: data[CELL_HEADER_LEN..CELL_LEN].to_vec(),
        })
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = vec![0u8; CELL_LEN];
        r.read_exact(&mut buf)
            .map_err(|e| TorError::Protocol(format!("cell read failed: {e}")))?;
        Self::from_bytes(&buf)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.to_bytes())
            .map_err(|e| TorError::Protocol(format!("cell write failed: {e}")))
    }

    // -- Specialized builders (spec §4.2) --

    pub fn create2(circuit_id: u32, handshake_data: &[u8]) -> Result<Self> {
        let mut payload = Vec::with_capacity(4 + handshake_data.len());
        payload.extend_from_slice(&HANDSHAKE_TYPE_NTOR.to_be_bytes());
        payload.extend_from_slice(&(handshake_data.len() as u16).to_be_bytes());
        payload.extend_from_slice(handshake_data);
        Self::new(circuit_id, CellCommand::Create2, payload)
    }

    pub fn parse_create2(&self) -> Result<(u16, Vec<u8>)> {
        if self.command != CellCommand::Create2 {
            return Err(TorError::Protocol("not a CREATE2 cell".into()));
        }
        if self.payload.len() < 4 {
            return Err(TorError::Protocol("CREATE2 payload too short".into()));
        }
        let htype = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let hlen = u16::from_be_bytes([self.payload[2], self.payload[3]]) as usize;
        if self.payload.len() < 4 + hlen {
            return Err(TorError::Protocol("CREATE2 payload truncated".into()));
        }
        Ok((htype, self.payload[4..4 + hlen].to_vec()))
    }

    pub fn created2(circuit_id: u32, handshake_data: &[u8]) -> Result<Self> {
        let mut payload = Vec::with_capacity(2 + handshake_data.len());
        payload.extend_from_slice(&(handshake_data.len() as u16).to_be_bytes());
        payload.extend_from_slice(handshake_data);
        Self::new(circuit_id, CellCommand::Created2, payload)
    }

    pub fn parse_created2(&self) -> Result<Vec<u8>> {
        if self.command != CellCommand::Created2 {
            return Err(TorError::Protocol("not a CREATED2 cell".into()));
        }
        if self.payload.len() < 2 {
            return Err(TorError::Protocol("CREATED2 payload too short".into()));
        }
        let hlen = u16::from_be_bytes([self.payload[0], self.payload[1]]) as usize;
        if self.payload.len() < 2 + hlen {
            return Err(TorError::Protocol("CREATED2 payload truncated".into()));
        }
        Ok(self.payload[2..2 + hlen].to_vec())
    }

    pub fn destroy(circuit_id: u32, reason: DestroyReason) -> Result<Self> {
        Self::new(circuit_id, CellCommand::Destroy, vec![reason as u8])
    }

    pub fn parse_destroy(&self) -> Result<DestroyReason> {
        if self.command != CellCommand::Destroy {
            return Err(TorError::Protocol("not a DESTROY cell".into()));
        }
        Ok(DestroyReason::from(*self.payload.first().unwrap_or(&0)))
    }

    pub fn relay(circuit_id: u32, relay_payload: Vec<u8>) -> Result<Self> {
        Self::new(circuit_id, CellCommand::Relay, relay_payload)
    }

    pub fn relay_early(circuit_id: u32, relay_payload: Vec<u8>) -> Result<Self> {
        Self::new(circuit_id, CellCommand::RelayEarly, relay_payload)
    }
}

/// A variable-length cell (VERSIONS / PADDING_NEGOTIATE; informational,
/// not required for core correctness per spec §3).
#[derive(Debug, Clone)]
pub struct VarCell {
    pub circuit_id: u32,
    pub command: CellCommand,
    pub payload: Vec<u8>,
}

impl VarCell {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VAR_CELL_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.circuit_id.to_be_bytes());
        buf.push(self.command as u8);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < VAR_CELL_HEADER_LEN {
            return Err(TorError::Protocol("var cell header too short".into()));
        }
        let circuit_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let command = CellCommand::from_u8(data[4])
            .ok_or_else(|| TorError::Protocol(format!("unknown cell command {}", data[4])))?;
        let len = u16::from_be_bytes([data[5], data[6]]) as usize;
        if data.len() < VAR_CELL_HEADER_LEN + len {
            return Err(TorError::Protocol("var cell payload truncated".into()));
        }
        Ok(Self {
            circuit_id,
            command,
            payload: data[VAR_CELL_HEADER_LEN..VAR_CELL_HEADER_LEN + len].to_vec(),
        })
    }
}

/// RELAY sub-cell carried in the payload of a RELAY/RELAY_EARLY cell
/// (spec §3). The `digest` field is always zero-filled: this design does
/// not implement running-digest verification (spec §1 Non-goals, §9
/// open question b) — `recognized` alone gates dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCell {
    pub command: RelayCommand,
    pub recognized: u16,
    pub stream_id: u16,
    pub digest: [u8; 4],
    pub data: Vec<u8>,
}

impl RelayCell {
    pub const HEADER_LEN: usize = 11;
    pub const MAX_DATA_LEN: usize = CELL_PAYLOAD_LEN - Self::HEADER_LEN;

    pub fn new(command: RelayCommand, stream_id: u16, data: Vec<u8>) -> Self {
        Self {
            command,
            recognized: 0,
            stream_id,
            digest: [0; 4],
            data,
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        if self.data.len() > Self::MAX_DATA_LEN {
            return Err(TorError::Protocol("relay cell data too large".into()));
        }
        let mut buf = Vec::with_capacity(CELL_PAYLOAD_LEN);
        buf.push(self.command as u8);
        buf.extend_from_slice(&self.recognized.to_be_bytes());
        buf.extend_from_slice(&self.stream_id.to_be_bytes());
        buf.extend_from_slice(&self.digest);
        buf.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf.resize(CELL_PAYLOAD_LEN, 0);
        Ok(buf)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::HEADER_LEN {
            return Err(TorError::Protocol("relay cell too short".into()));
        }
        let command = RelayCommand::from_u8(payload[0])
            .ok_or_else(|| TorError::Protocol(format!("unknown relay command {}", payload[0])))?;
        let recognized = u16::from_be_bytes([payload[1], payload[2]]);
        let stream_id = u16::from_be_bytes([payload[3], payload[4]]);
        let digest = [payload[5], payload[6], payload[7], payload[8]];
        let length = u16::from_be_bytes([payload[9], payload[10]]) as usize;
        let end = Self::HEADER_LEN + length;
        if end > payload.len() {
            return Err(TorError::Protocol("relay cell data truncated".into()));
        }
        Ok(Self {
            command,
            recognized,
            stream_id,
            digest,
            data: payload[Self::HEADER_LEN..end].to_vec(),
        })
    }
}

/// EXTEND2 payload as used in this system (spec §4.2's simplified layout,
/// not the canonical Tor link-specifier list — spec §9 open question c).
pub struct Extend2Payload {
    pub hostname: String,
    pub port: u16,
    pub handshake_type: u16,
    pub handshake_data: Vec<u8>,
}

const EXTEND2_HOSTNAME_LEN: usize = 256;

impl Extend2Payload {
    pub fn pack(&self) -> Result<Vec<u8>> {
        if self.hostname.len() >= EXTEND2_HOSTNAME_LEN {
            return Err(TorError::Protocol("EXTEND2 hostname too long".into()));
        }
        let mut buf = Vec::with_capacity(EXTEND2_HOSTNAME_LEN + 2 + 4 + self.handshake_data.len());
        let mut host_field = [0u8; EXTEND2_HOSTNAME_LEN];
        host_field[..self.hostname.len()].copy_from_slice(self.hostname.as_bytes());
        buf.extend_from_slice(&host_field);
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf.extend_from_slice(&self.handshake_type.to_be_bytes());
        buf.extend_from_slice(&(self.handshake_data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.handshake_data);
        Ok(buf)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < EXTEND2_HOSTNAME_LEN + 2 + 4 {
            return Err(TorError::Protocol("EXTEND2 payload too short".into()));
        }
        let hostname = data[..EXTEND2_HOSTNAME_LEN]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect::<String>();
        let mut off = EXTEND2_HOSTNAME_LEN;
        let port = u16::from_be_bytes([data[off], data[off + 1]]);
        off += 2;
        let handshake_type = u16::from_be_bytes([data[off], data[off + 1]]);
        off += 2;
        let hlen = u16::from_be_bytes([data[off], data[off + 1]]) as usize;
        off += 2;
        if data.len() < off + hlen {
            return Err(TorError::Protocol("EXTEND2 handshake data truncated".into()));
        }
        Ok(Self {
            hostname,
            port,
            handshake_type,
            handshake_data: data[off..off + hlen].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_cell_round_trip() {
        let cell = Cell::new(12345, CellCommand::Create2, vec![1, 2, 3, 4]).unwrap();
        let bytes = cell.to_bytes();
        assert_eq!(bytes.len(), CELL_LEN);
        let parsed = Cell::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.circuit_id, 12345);
        assert_eq!(parsed.command, CellCommand::Create2);
        assert_eq!(&parsed.payload[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn create2_created2_round_trip() {
        let hs = vec![9u8; 100];
        let cell = Cell::create2(7, &hs).unwrap();
        let (htype, data) = cell.parse_create2().unwrap();
        assert_eq!(htype, HANDSHAKE_TYPE_NTOR);
        assert_eq!(data, hs);

        let reply = vec![8u8; 64];
        let created = Cell::created2(7, &reply).unwrap();
        assert_eq!(created.parse_created2().unwrap(), reply);
    }

    #[test]
    fn destroy_round_trip() {
        let cell = Cell::destroy(1, DestroyReason::Finished).unwrap();
        assert_eq!(cell.parse_destroy().unwrap(), DestroyReason::Finished);
    }

    #[test]
    fn relay_cell_round_trip() {
        let relay = RelayCell::new(RelayCommand::Begin, 42, b"127.0.0.1:80\0".to_vec());
        let packed = relay.pack().unwrap();
        assert_eq!(packed.len(), CELL_PAYLOAD_LEN);
        let parsed = RelayCell::parse(&packed).unwrap();
        assert_eq!(parsed.command, RelayCommand::Begin);
        assert_eq!(parsed.stream_id, 42);
        assert_eq!(parsed.data, b"127.0.0.1:80\0");
    }

    #[test]
    fn extend2_round_trip() {
        let ext = Extend2Payload {
            hostname: "127.0.0.1".into(),
            port: 9001,
            handshake_type: HANDSHAKE_TYPE_NTOR,
            handshake_data: vec![1, 2, 3],
        };
        let packed = ext.pack().unwrap();
        let parsed = Extend2Payload::parse(&packed).unwrap();
        assert_eq!(parsed.hostname, "127.0.0.1");
        assert_eq!(parsed.port, 9001);
        assert_eq!(parsed.handshake_data, vec![1, 2, 3]);
    }

    #[test]
    fn short_buffer_is_error() {
        assert!(Cell::from_bytes(&[0u8; 10]).is_err());
        assert!(RelayCell::parse(&[0u8; 5]).is_err());
    }

    #[test]
    fn oversize_payload_is_error() {
        let huge = vec![0u8; CELL_PAYLOAD_LEN + 1];
        assert!(Cell::new(1, CellCommand::Relay, huge).is_err());
    }
}
