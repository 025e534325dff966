//! Relay node engine (C6, spec §4.5).
//!
//! One role (Guard, Middle, Exit) parameterizes behavior; the code paths
//! are otherwise identical (spec §4.5). Concurrency model: thread per
//! accepted connection, thread per opened outbound leg (`next_fd` /
//! `target_fd`), with each circuit's mutable state behind one `Mutex`
//! (spec §5's explicit permission to promote the reference's single
//! `select()` loop this way, §C.4).

use crate::config::Mode;
use crate::error::{NetError, Result};
use pq_ntor_core::cell::{Cell, CellCommand, DestroyReason, RelayCell, RelayCommand};
use pq_ntor_core::handshake;
use pq_ntor_core::onion::RelayOnion;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use x25519_dalek::{PublicKey, StaticSecret};

use pq_ntor_core::primitives::x25519_keypair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Guard,
    Middle,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Handshake,
    Open,
    Extending,
    Closing,
}

/// Long-term identity material a relay needs to terminate handshakes.
/// Only Classic-NTOR needs a persistent keypair; PQ/Hybrid generate fresh
/// ephemeral material per handshake (spec §4.1).
struct Identity {
    relay_id: [u8; 20],
    mode: Mode,
    classic_secret: StaticSecret,
    classic_public: PublicKey,
}

struct NextHop {
    writer: TcpStream,
    circ_id_next: u32,
}

struct CircuitInner {
    prev_writer: TcpStream,
    layer: Option<RelayOnion>,
    next: Option<NextHop>,
    target: Option<TcpStream>,
    phase: Phase,
}

/// A live circuit: immutable lookup keys plus one `Mutex`-guarded payload
/// (spec §4.5's two-way lookup: forward dispatch keys off `(prev_conn,
/// circ_id_prev)` via `CircuitTable`; the backward leg's `circ_id_next`
/// is carried directly by the reader thread that owns it).
pub struct CircuitEntry {
    circ_id_prev: u32,
    prev_conn: u64,
    inner: Mutex<CircuitInner>,
}

/// Lookup by `(prev_conn, circ_id_prev)` only (spec §4.5's forward
/// direction). The backward direction needs no table lookup here: each
/// circuit's outbound leg is a connection this relay itself opened in
/// `handle_extend2`, so its dedicated reader thread already carries the
/// `Arc<CircuitEntry>` it needs without a second index.
#[derive(Default)]
struct CircuitTable {
    by_prev: Mutex<HashMap<(u64, u32), Arc<CircuitEntry>>>,
}

impl CircuitTable {
    fn insert(&self, entry: Arc<CircuitEntry>) {
        self.by_prev
            .lock()
            .unwrap()
            .insert((entry.prev_conn, entry.circ_id_prev), entry);
    }

    fn get_by_prev(&self, conn: u64, circ_id: u32) -> Option<Arc<CircuitEntry>> {
        self.by_prev.lock().unwrap().get(&(conn, circ_id)).cloned()
    }

    fn remove(&self, entry: &CircuitEntry) {
        self.by_prev
            .lock()
            .unwrap()
            .remove(&(entry.prev_conn, entry.circ_id_prev));
    }
}

pub struct RelayNode {
    pub role: Role,
    identity: Identity,
    table: CircuitTable,
    conn_ids: AtomicU64,
    directory_host: String,
    directory_port: u16,
}

impl RelayNode {
    pub fn new(
        role: Role,
        relay_id: [u8; 20],
        mode: Mode,
        directory_host: String,
        directory_port: u16,
    ) -> Self {
        let (classic_secret, classic_public) = x25519_keypair();
        Self {
            role,
            identity: Identity {
                relay_id,
                mode,
                classic_secret,
                classic_public,
            },
            table: CircuitTable::default(),
            conn_ids: AtomicU64::new(1),
            directory_host,
            directory_port,
        }
    }

    fn next_conn_id(&self) -> u64 {
        self.conn_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Register this relay with the directory before entering the accept
    /// loop (spec §C.1: local-mode `POST /register`).
    pub fn register_with_directory(&self, hostname: &str, port: u16) -> Result<u64> {
        let role = match self.role {
            Role::Guard => crate::node::NodeRole::Guard,
            Role::Middle => crate::node::NodeRole::Middle,
            Role::Exit => crate::node::NodeRole::Exit,
        };
        crate::directory::client::register(&self.directory_host, self.directory_port, hostname, port, role)
    }

    pub fn run(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        for stream in listener.incoming() {
            let stream = stream?;
            let this = Arc::clone(self);
            let conn_id = this.next_conn_id();
            std::thread::spawn(move || this.handle_connection(stream, conn_id));
        }
        Ok(())
    }

    fn handle_connection(self: Arc<Self>, mut stream: TcpStream, conn_id: u64) {
        loop {
            let cell = match Cell::read_from(&mut stream) {
                Ok(c) => c,
                Err(_) => break,
            };
            if let Err(e) = self.dispatch_forward(&mut stream, conn_id, cell) {
                tracing::warn!(error = %e, conn_id, "forward dispatch failed");
            }
        }
        self.teardown_connection(conn_id);
    }

    fn teardown_connection(&self, conn_id: u64) {
        let mut by_prev = self.table.by_prev.lock().unwrap();
        by_prev.retain(|(c, _), _| *c != conn_id);
    }

    fn dispatch_forward(&self, stream: &mut TcpStream, conn_id: u64, cell: Cell) -> Result<()> {
        match cell.command {
            CellCommand::Create2 => self.handle_create2(stream, conn_id, cell),
            CellCommand::Relay | CellCommand::RelayEarly => {
                self.handle_relay_forward(conn_id, cell)
            }
            CellCommand::Destroy => self.handle_destroy(conn_id, cell),
            _ => {
                tracing::debug!(?cell.command, "ignoring unhandled cell command");
                Ok(())
            }
        }
    }

    /// IDLE -> HANDSHAKE -> OPEN: terminate the near-side handshake,
    /// install the single layer, reply with CREATED2.
    fn handle_create2(&self, stream: &mut TcpStream, conn_id: u64, cell: Cell) -> Result<()> {
        let (_, handshake_data) = cell.parse_create2()?;
        let (reply, result) = self.server_handshake(&handshake_data)?;

        let layer = RelayOnion::new(
            pq_ntor_core::onion::OnionLayer::from_key_material(&result.k_enc)
                .ok_or_else(|| NetError::Directory("malformed K_enc".into()))?,
        );

        let entry = Arc::new(CircuitEntry {
            circ_id_prev: cell.circuit_id,
            prev_conn: conn_id,
            inner: Mutex::new(CircuitInner {
                prev_writer: stream.try_clone()?,
                layer: Some(layer),
                next: None,
                target: None,
                phase: Phase::Open,
            }),
        });
        self.table.insert(entry);

        let reply_cell = Cell::created2(cell.circuit_id, &reply)?;
        reply_cell.write_to(stream)?;
        tracing::info!(circ_id = cell.circuit_id, role = ?self.role, "circuit opened");
        Ok(())
    }

    fn server_handshake(
        &self,
        handshake_data: &[u8],
    ) -> Result<(Vec<u8>, handshake::HandshakeResult)> {
        Ok(match self.identity.mode {
            Mode::Classic => handshake::classic::server_handle(
                &self.identity.relay_id,
                &self.identity.classic_secret,
                &self.identity.classic_public,
                handshake_data,
            )?,
            Mode::Pq => handshake::pq::server_handle(&self.identity.relay_id, handshake_data)?,
            Mode::Hybrid => handshake::hybrid::server_handle(&self.identity.relay_id, handshake_data)?,
        })
    }

    /// OPEN, forward RELAY/RELAY_EARLY from `prev_fd`: peel one layer,
    /// dispatch if recognized, else forward untouched (spec §4.5 I2/I6).
    fn handle_relay_forward(&self, conn_id: u64, cell: Cell) -> Result<()> {
        let entry = self
            .table
            .get_by_prev(conn_id, cell.circuit_id)
            .ok_or_else(|| NetError::Directory("unknown circuit".into()))?;

        let mut payload = cell.payload;
        let recognized = {
            let inner = entry.inner.lock().unwrap();
            let layer = inner
                .layer
                .as_ref()
                .ok_or_else(|| NetError::Directory("circuit has no layer".into()))?;
            layer.peel(&mut payload)
        };

        if !recognized {
            self.forward_unrecognized(&entry, cell.command, payload)?;
            return Ok(());
        }

        let relay_cell = RelayCell::parse(&payload)?;
        match relay_cell.command {
            RelayCommand::Extend2 => self.handle_extend2(&entry, &relay_cell),
            RelayCommand::Begin if self.role == Role::Exit => self.handle_begin(&entry, &relay_cell),
            RelayCommand::Data => self.handle_relay_data(&entry, &relay_cell),
            _ => {
                tracing::debug!(?relay_cell.command, "no-op relay sub-command");
                Ok(())
            }
        }
    }

    fn forward_unrecognized(
        &self,
        entry: &Arc<CircuitEntry>,
        command: CellCommand,
        payload: Vec<u8>,
    ) -> Result<()> {
        let mut inner = entry.inner.lock().unwrap();
        let next = inner
            .next
            .as_mut()
            .ok_or_else(|| NetError::Directory("no next hop to forward to".into()))?;
        let cell = match command {
            CellCommand::RelayEarly => Cell::relay_early(next.circ_id_next, payload)?,
            _ => Cell::relay(next.circ_id_next, payload)?,
        };
        cell.write_to(&mut next.writer)?;
        Ok(())
    }

    /// EXTENDING: connect to the named next hop, forward the embedded
    /// handshake as CREATE2, wait for CREATED2, wrap the reply in
    /// EXTENDED2, add one backward layer, reply to `prev_fd`.
    fn handle_extend2(&self, entry: &Arc<CircuitEntry>, relay_cell: &RelayCell) -> Result<()> {
        let extend = pq_ntor_core::cell::Extend2Payload::parse(&relay_cell.data)?;
        {
            entry.inner.lock().unwrap().phase = Phase::Extending;
        }

        let mut next_stream = TcpStream::connect((extend.hostname.as_str(), extend.port))
            .map_err(|e| NetError::ExtensionFailed(format!("connect to next hop failed: {e}")))?;
        let circ_id_next = rand::random::<u32>() & 0x7FFF_FFFF;

        let create2 = Cell::create2(circ_id_next, &extend.handshake_data)?;
        create2.write_to(&mut next_stream)?;
        let created2 = Cell::read_from(&mut next_stream)
            .map_err(|e| NetError::ExtensionFailed(format!("next hop did not reply: {e}")))?;
        if created2.command != CellCommand::Created2 {
            return Err(NetError::ExtensionFailed("next hop sent wrong command".into()));
        }
        let handshake_reply = created2.parse_created2()?;

        let reader_clone = next_stream.try_clone()?;
        {
            let mut inner = entry.inner.lock().unwrap();
            inner.next = Some(NextHop {
                writer: next_stream,
                circ_id_next,
            });
            inner.phase = Phase::Open;
        }

        let extended_relay = RelayCell::new(RelayCommand::Extended2, relay_cell.stream_id, handshake_reply);
        let mut extended_payload = extended_relay.pack()?;
        {
            let inner = entry.inner.lock().unwrap();
            inner.layer.as_ref().unwrap().add_back(&mut extended_payload);
        }
        {
            let mut inner = entry.inner.lock().unwrap();
            let cell = Cell::relay(entry.circ_id_prev, extended_payload)?;
            cell.write_to(&mut inner.prev_writer)?;
        }

        self.spawn_backward_reader(Arc::clone(entry), reader_clone, circ_id_next);
        tracing::info!(circ_id = entry.circ_id_prev, next = %extend.hostname, "extended circuit");
        Ok(())
    }

    /// Reads cells arriving on a circuit's `next_fd` forever, adding one
    /// backward layer and forwarding each to `prev_fd` (spec §4.5's
    /// "cell arrival from `next_fd`" rule, run off the main accept loop).
    fn spawn_backward_reader(
        self: &Arc<Self>,
        entry: Arc<CircuitEntry>,
        mut reader: TcpStream,
        circ_id_next: u32,
    ) {
        std::thread::spawn(move || loop {
            let cell = match Cell::read_from(&mut reader) {
                Ok(c) => c,
                Err(_) => break,
            };
            if cell.circuit_id != circ_id_next {
                continue;
            }
            let mut payload = cell.payload;
            {
                let inner = entry.inner.lock().unwrap();
                if let Some(layer) = inner.layer.as_ref() {
                    layer.add_back(&mut payload);
                }
            }
            let mut inner = entry.inner.lock().unwrap();
            let result = Cell::relay(entry.circ_id_prev, payload)
                .and_then(|cell| cell.write_to(&mut inner.prev_writer));
            drop(inner);
            if result.is_err() {
                break;
            }
        });
    }

    /// BEGIN (Exit only): open a TCP socket to the named target, reply
    /// CONNECTED, and spawn a reader that ferries target bytes back as
    /// RELAY/DATA cells.
    fn handle_begin(&self, entry: &Arc<CircuitEntry>, relay_cell: &RelayCell) -> Result<()> {
        let addr = std::str::from_utf8(&relay_cell.data)
            .unwrap_or("")
            .trim_end_matches('\0')
            .to_string();
        let (host, port) = addr
            .rsplit_once(':')
            .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h.to_string(), p)))
            .ok_or_else(|| NetError::Directory(format!("malformed BEGIN address: {addr}")))?;

        let target = TcpStream::connect((host.as_str(), port))
            .map_err(|e| NetError::ExtensionFailed(format!("connect to target failed: {e}")))?;
        let target_reader = target.try_clone()?;

        entry.inner.lock().unwrap().target = Some(target);

        let connected = RelayCell::new(RelayCommand::Connected, relay_cell.stream_id, Vec::new());
        let mut connected_payload = connected.pack()?;
        {
            let mut inner = entry.inner.lock().unwrap();
            inner.layer.as_ref().unwrap().add_back(&mut connected_payload);
            let cell = Cell::relay(entry.circ_id_prev, connected_payload)?;
            cell.write_to(&mut inner.prev_writer)?;
        }

        self.spawn_target_reader(Arc::clone(entry), target_reader, relay_cell.stream_id);
        Ok(())
    }

    /// OPEN, readable bytes on `target_fd` (Exit): wrap in RELAY/DATA with
    /// one backward layer applied, forward to `prev_fd`.
    fn spawn_target_reader(self: &Arc<Self>, entry: Arc<CircuitEntry>, mut target: TcpStream, stream_id: u16) {
        std::thread::spawn(move || {
            let mut buf = vec![0u8; RelayCell::MAX_DATA_LEN];
            loop {
                let n = match target.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let data_cell = RelayCell::new(RelayCommand::Data, stream_id, buf[..n].to_vec());
                let mut payload = match data_cell.pack() {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let mut inner = entry.inner.lock().unwrap();
                if let Some(layer) = inner.layer.as_ref() {
                    layer.add_back(&mut payload);
                }
                let sent = Cell::relay(entry.circ_id_prev, payload).and_then(|c| c.write_to(&mut inner.prev_writer));
                drop(inner);
                if sent.is_err() {
                    break;
                }
            }
        });
    }

    /// DATA: if a next hop exists, repackage onward on `(next_fd,
    /// circ_id_next)`; if Exit with a target, write straight through.
    fn handle_relay_data(&self, entry: &Arc<CircuitEntry>, relay_cell: &RelayCell) -> Result<()> {
        let mut inner = entry.inner.lock().unwrap();
        if let Some(next) = inner.next.as_mut() {
            let data_cell = RelayCell::new(RelayCommand::Data, relay_cell.stream_id, relay_cell.data.clone());
            let payload = data_cell.pack()?;
            let cell = Cell::relay(next.circ_id_next, payload)?;
            cell.write_to(&mut next.writer)?;
            return Ok(());
        }
        if self.role == Role::Exit {
            if let Some(target) = inner.target.as_mut() {
                target.write_all(&relay_cell.data)?;
            }
        }
        Ok(())
    }

    /// CLOSING: drop the layer and both outbound legs. Dropping `next`'s
    /// and `target`'s `TcpStream`s closes the sockets, which is what
    /// unblocks their dedicated reader threads (spec §4.5 I7).
    fn handle_destroy(&self, conn_id: u64, cell: Cell) -> Result<()> {
        let reason = cell.parse_destroy().unwrap_or(DestroyReason::None);
        if let Some(entry) = self.table.get_by_prev(conn_id, cell.circuit_id) {
            {
                let mut inner = entry.inner.lock().unwrap();
                inner.phase = Phase::Closing;
                inner.layer = None;
                inner.next = None;
                inner.target = None;
            }
            self.table.remove(&entry);
            tracing::info!(circ_id = cell.circuit_id, ?reason, "circuit destroyed");
        }
        Ok(())
    }
}
