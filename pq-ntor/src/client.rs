//! Client circuit builder (C5, spec §4.4).

use crate::config::Mode;
use crate::error::{NetError, Result};
use crate::node::{NodeInfo, NodeList};
use pq_ntor_core::cell::{
    Cell, CellCommand, Extend2Payload, RelayCell, RelayCommand, HANDSHAKE_TYPE_NTOR,
};
use pq_ntor_core::handshake::{self, HandshakeResult};
use pq_ntor_core::onion::{ClientOnion, OnionLayer};
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// Reference value from spec §5: the client's receive timeout on the Guard
/// fd while a circuit is being built.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const STREAM_ID: u16 = 1;

enum ClientHandshakeState {
    Classic(handshake::classic::ClientState),
    Pq(handshake::pq::ClientState),
    Hybrid(handshake::hybrid::ClientState),
}

fn client_create(mode: Mode, relay_id: [u8; 20]) -> Result<(ClientHandshakeState, Vec<u8>)> {
    Ok(match mode {
        Mode::Classic => {
            let (state, onionskin) = handshake::classic::client_create(relay_id);
            (ClientHandshakeState::Classic(state), onionskin)
        }
        Mode::Pq => {
            let (state, onionskin) = handshake::pq::client_create(relay_id)?;
            (ClientHandshakeState::Pq(state), onionskin)
        }
        Mode::Hybrid => {
            let (state, onionskin) = handshake::hybrid::client_create(relay_id)?;
            (ClientHandshakeState::Hybrid(state), onionskin)
        }
    })
}

fn client_finish(state: ClientHandshakeState, reply: &[u8]) -> Result<HandshakeResult> {
    Ok(match state {
        ClientHandshakeState::Classic(s) => handshake::classic::client_finish(s, reply)?,
        ClientHandshakeState::Pq(s) => handshake::pq::client_finish(s, reply)?,
        ClientHandshakeState::Hybrid(s) => handshake::hybrid::client_finish(s, reply)?,
    })
}

fn random_circ_id() -> u32 {
    loop {
        let candidate = rand::random::<u32>() & 0x7FFF_FFFF;
        if candidate != 0 {
            return candidate;
        }
    }
}

/// Informational bytes-sent/received and circuit lifetime, printed by the
/// client binary on clean exit (recovered from `tor_client_print_stats`,
/// spec §C.3 — not load-bearing for any invariant).
#[derive(Debug, Clone, Copy)]
pub struct CircuitStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub established: bool,
    pub elapsed: Duration,
}

pub struct Circuit {
    pub circ_id: u32,
    stream: TcpStream,
    onion: ClientOnion,
    pub guard: NodeInfo,
    pub middle: Option<NodeInfo>,
    pub exit: Option<NodeInfo>,
    pub established: bool,
    bytes_sent: u64,
    bytes_received: u64,
    started_at: Instant,
}

impl Circuit {
    pub fn layer_count(&self) -> usize {
        self.onion.layer_count()
    }

    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            established: self.established,
            elapsed: self.started_at.elapsed(),
        }
    }
}

pub struct CircuitBuilder {
    mode: Mode,
    handshake_timeout: Duration,
}

impl CircuitBuilder {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// `build_circuit()`: pick the first node of each role (spec §4.4's
    /// "simplest policy"), then create + extend twice.
    pub fn build_circuit(&self, nodes: &NodeList) -> Result<Circuit> {
        let guard = nodes
            .guards
            .first()
            .ok_or_else(|| NetError::Directory("no guard nodes available".into()))?;
        let middle = nodes
            .middles
            .first()
            .ok_or_else(|| NetError::Directory("no middle nodes available".into()))?;
        let exit = nodes
            .exits
            .first()
            .ok_or_else(|| NetError::Directory("no exit nodes available".into()))?;

        let mut circuit = self.create_first_hop(guard)?;
        if let Err(e) = self.extend_to(&mut circuit, middle, 1) {
            return Err(e);
        }
        if let Err(e) = self.extend_to(&mut circuit, exit, 2) {
            return Err(e);
        }
        circuit.middle = Some(middle.clone());
        circuit.exit = Some(exit.clone());
        circuit.established = true;
        tracing::info!(circ_id = circuit.circ_id, "circuit established");
        Ok(circuit)
    }

    pub fn create_first_hop(&self, guard: &NodeInfo) -> Result<Circuit> {
        let mut stream = TcpStream::connect((guard.hostname.as_str(), guard.port))?;
        stream.set_read_timeout(Some(self.handshake_timeout))?;

        let circ_id = random_circ_id();
        let (state, onionskin) = client_create(self.mode, guard.identity)?;
        let cell = Cell::create2(circ_id, &onionskin)?;
        cell.write_to(&mut stream)?;

        let reply_cell = read_cell_with_timeout(&mut stream)?;
        if reply_cell.command != CellCommand::Created2 {
            return Err(NetError::UnexpectedCommand(format!(
                "expected CREATED2, got {:?}",
                reply_cell.command
            )));
        }
        let handshake_data = reply_cell.parse_created2()?;
        let result = client_finish(state, &handshake_data)?;

        let mut onion = ClientOnion::new();
        let layer = OnionLayer::from_key_material(&result.k_enc)
            .ok_or_else(|| NetError::Directory("malformed K_enc from handshake".into()))?;
        onion.install(0, layer);

        tracing::debug!(circ_id, hop = "guard", "first hop established");
        Ok(Circuit {
            circ_id,
            stream,
            onion,
            guard: guard.clone(),
            middle: None,
            exit: None,
            established: false,
            bytes_sent: 0,
            bytes_received: 0,
            started_at: Instant::now(),
        })
    }

    /// `extend_to()`: run a fresh handshake against `next`, wrap it in an
    /// EXTEND2 sub-cell encrypted through every already-installed layer,
    /// and install the new layer at `layer_idx` on success.
    pub fn extend_to(&self, circuit: &mut Circuit, next: &NodeInfo, layer_idx: usize) -> Result<()> {
        let (state, onionskin) = client_create(self.mode, next.identity)?;
        let extend_payload = Extend2Payload {
            hostname: next.hostname.clone(),
            port: next.port,
            handshake_type: HANDSHAKE_TYPE_NTOR,
            handshake_data: onionskin,
        }
        .pack()?;

        let relay_cell = RelayCell::new(RelayCommand::Extend2, STREAM_ID, extend_payload);
        let mut payload = relay_cell.pack()?;
        circuit.onion.encrypt(&mut payload);

        let cell = Cell::relay_early(circuit.circ_id, payload)?;
        cell.write_to(&mut circuit.stream)
            .map_err(|e| NetError::ExtensionFailed(format!("sending EXTEND2 failed: {e}")))?;

        let reply_cell = read_cell_with_timeout(&mut circuit.stream)
            .map_err(|e| NetError::ExtensionFailed(format!("no reply to EXTEND2: {e}")))?;
        if reply_cell.command != CellCommand::Relay {
            return Err(NetError::ExtensionFailed(format!(
                "expected RELAY, got {:?}",
                reply_cell.command
            )));
        }
        let mut reply_payload = reply_cell.payload;
        circuit.onion.decrypt(&mut reply_payload);
        let reply_relay = RelayCell::parse(&reply_payload)?;
        if reply_relay.command != RelayCommand::Extended2 {
            return Err(NetError::ExtensionFailed(format!(
                "expected EXTENDED2, got {:?}",
                reply_relay.command
            )));
        }

        let result = client_finish(state, &reply_relay.data)?;
        let layer = OnionLayer::from_key_material(&result.k_enc)
            .ok_or_else(|| NetError::Directory("malformed K_enc from handshake".into()))?;
        circuit.onion.install(layer_idx, layer);

        tracing::debug!(circ_id = circuit.circ_id, layer_idx, host = %next.hostname, "extended circuit");
        Ok(())
    }

    /// `begin_stream()`: RELAY/BEGIN with "host:port", await RELAY/CONNECTED.
    pub fn begin_stream(&self, circuit: &mut Circuit, host: &str, port: u16) -> Result<()> {
        let mut data = format!("{host}:{port}").into_bytes();
        data.push(0);
        let relay_cell = RelayCell::new(RelayCommand::Begin, STREAM_ID, data);
        self.send_relay_cell(circuit, relay_cell)?;

        let reply = self.recv_relay_cell(circuit)?;
        if reply.command != RelayCommand::Connected {
            return Err(NetError::UnexpectedCommand(format!(
                "expected CONNECTED, got {:?}",
                reply.command
            )));
        }
        Ok(())
    }

    /// `send_data()`: fragment into `payload_len - 11` chunks (spec §4.4
    /// / Scenario F), each wrapped as RELAY/DATA and sent in order.
    pub fn send_data(&self, circuit: &mut Circuit, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(RelayCell::MAX_DATA_LEN) {
            let relay_cell = RelayCell::new(RelayCommand::Data, STREAM_ID, chunk.to_vec());
            self.send_relay_cell(circuit, relay_cell)?;
            circuit.bytes_sent += chunk.len() as u64;
        }
        Ok(())
    }

    /// `recv_data()`: one cell in, decrypt, parse; non-DATA cells are
    /// skipped (return 0); a timeout/close after `established` with bytes
    /// already delivered is success, not failure.
    pub fn recv_data(&self, circuit: &mut Circuit, buf: &mut [u8]) -> Result<usize> {
        let relay_cell = match self.recv_relay_cell(circuit) {
            Ok(c) => c,
            Err(NetError::Timeout) | Err(NetError::Io(_)) if circuit.established && circuit.bytes_received > 0 => {
                return Ok(0)
            }
            Err(e) => return Err(e),
        };
        if relay_cell.command != RelayCommand::Data {
            return Ok(0);
        }
        let n = buf.len().min(relay_cell.data.len());
        buf[..n].copy_from_slice(&relay_cell.data[..n]);
        circuit.bytes_received += n as u64;
        Ok(n)
    }

    fn send_relay_cell(&self, circuit: &mut Circuit, relay_cell: RelayCell) -> Result<()> {
        let mut payload = relay_cell.pack()?;
        circuit.onion.encrypt(&mut payload);
        let cell = Cell::relay(circuit.circ_id, payload)?;
        cell.write_to(&mut circuit.stream)?;
        Ok(())
    }

    fn recv_relay_cell(&self, circuit: &mut Circuit) -> Result<RelayCell> {
        let reply_cell = read_cell_with_timeout(&mut circuit.stream)?;
        let mut payload = reply_cell.payload;
        circuit.onion.decrypt(&mut payload);
        Ok(RelayCell::parse(&payload)?)
    }
}

/// Reads one fixed cell, surfacing a timed-out/would-block read as
/// `NetError::Timeout` rather than `Cell::read_from`'s generic protocol
/// error (which would otherwise swallow the `io::ErrorKind`).
fn read_cell_with_timeout(stream: &mut TcpStream) -> Result<Cell> {
    use std::io::Read;
    let mut buf = vec![0u8; pq_ntor_core::cell::CELL_LEN];
    stream.read_exact(&mut buf)?;
    Ok(Cell::from_bytes(&buf)?)
}
