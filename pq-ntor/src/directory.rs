//! Directory client/server contract (C7, spec §4.6).
//!
//! The client side is a thin `ureq` GET/POST wrapper (grounded in
//! `arti-ureq`'s choice of `ureq` as the synchronous HTTP client for a
//! Tor-adjacent crate). The server side is a minimal hand-rolled HTTP/1.0
//! responder over `TcpListener`, matching how the original C prototype's
//! `directory_server.c` implements it directly over raw sockets rather than
//! pulling in a framework for a single-endpoint JSON service.

use crate::error::{NetError, Result};
use crate::node::{NodeInfo, NodeList, NodeRole};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Mutex;

pub mod client {
    use super::*;

    pub fn fetch(host: &str, port: u16) -> Result<NodeList> {
        let url = format!("http://{host}:{port}/nodes");
        tracing::debug!(%url, "fetching directory");
        let body = ureq::get(&url)
            .call()
            .map_err(|e| NetError::Directory(format!("GET /nodes failed: {e}")))?
            .into_string()
            .map_err(|e| NetError::Directory(format!("reading /nodes body failed: {e}")))?;
        NodeList::from_json(&body)
    }

    #[derive(Serialize)]
    struct RegisterRequest {
        hostname: String,
        port: u16,
        #[serde(rename = "type")]
        role: u8,
    }

    #[derive(Deserialize)]
    struct RegisterResponse {
        #[allow(dead_code)]
        status: String,
        node_id: u64,
    }

    /// `POST /register` (local test mode, spec §4.6 / §C.1).
    pub fn register(
        dir_host: &str,
        dir_port: u16,
        hostname: &str,
        node_port: u16,
        role: NodeRole,
    ) -> Result<u64> {
        let url = format!("http://{dir_host}:{dir_port}/register");
        let req = RegisterRequest {
            hostname: hostname.to_string(),
            port: node_port,
            role: role.as_u8(),
        };
        tracing::info!(%url, ?role, "registering with directory");
        let resp: RegisterResponse = ureq::post(&url)
            .send_json(req)
            .map_err(|e| NetError::Directory(format!("POST /register failed: {e}")))?
            .into_json()
            .map_err(|e| NetError::Directory(format!("reading /register response failed: {e}")))?;
        Ok(resp.node_id)
    }
}

/// The directory's in-memory node table plus the listener that serves it.
pub struct DirectoryServer {
    listener: TcpListener,
    nodes: Mutex<Vec<NodeInfo>>,
    next_id: Mutex<u64>,
}

impl DirectoryServer {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            nodes: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Seed the table (used by seed-test scenarios that want a directory
    /// pre-populated without a live `/register` round trip).
    pub fn seed(&self, nodes: Vec<NodeInfo>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    /// Accept connections forever, serving each on the calling thread's
    /// pool via a fresh spawned thread (thread-per-connection, spec §C.4).
    pub fn run(self: &std::sync::Arc<Self>) -> Result<()> {
        for stream in self.listener.incoming() {
            let stream = stream?;
            let this = std::sync::Arc::clone(self);
            std::thread::spawn(move || {
                if let Err(e) = this.handle_connection(stream) {
                    tracing::warn!(error = %e, "directory connection failed");
                }
            });
        }
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();

        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header)?;
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some(value) = header.strip_prefix("Content-Length:") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body)?;

        match (method.as_str(), path.as_str()) {
            ("GET", "/nodes") => self.handle_nodes(&mut stream),
            ("POST", "/register") => self.handle_register(&mut stream, &body),
            _ => write_response(&mut stream, 404, "Not Found", "{\"error\":\"not found\"}"),
        }
    }

    fn handle_nodes(&self, stream: &mut TcpStream) -> Result<()> {
        let list = NodeList {
            guards: self.by_role(NodeRole::Guard),
            middles: self.by_role(NodeRole::Middle),
            exits: self.by_role(NodeRole::Exit),
        };
        write_response(stream, 200, "OK", &list.to_json())
    }

    fn by_role(&self, role: NodeRole) -> Vec<NodeInfo> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.role == role)
            .cloned()
            .collect()
    }

    fn handle_register(&self, stream: &mut TcpStream, body: &[u8]) -> Result<()> {
        #[derive(Deserialize)]
        struct Req {
            hostname: String,
            port: u16,
            #[serde(rename = "type")]
            role: u8,
        }
        let req: Req = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => {
                return write_response(
                    stream,
                    400,
                    "Bad Request",
                    &format!("{{\"error\":\"{e}\"}}"),
                )
            }
        };
        let role = match NodeRole::from_u8(req.role) {
            Some(r) => r,
            None => {
                return write_response(
                    stream,
                    400,
                    "Bad Request",
                    "{\"error\":\"invalid type\"}",
                )
            }
        };

        let node_id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };
        // The directory only has a role + address to go on; the identity
        // used in handshakes is assigned out of band (node configuration,
        // spec §6) and carried separately in this local test mode.
        self.nodes.lock().unwrap().push(NodeInfo {
            hostname: req.hostname,
            port: req.port,
            role,
            identity: derive_placeholder_identity(node_id),
        });

        tracing::info!(node_id, ?role, "registered node");
        write_response(
            stream,
            200,
            "OK",
            &format!("{{\"status\":\"registered\",\"node_id\":{node_id}}}"),
        )
    }
}

/// Local test mode has no out-of-band identity exchange; derive a
/// deterministic stand-in so registered nodes still round-trip through
/// `/nodes` with a usable 20-byte identity.
fn derive_placeholder_identity(node_id: u64) -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(&node_id.to_be_bytes());
    id
}

fn write_response(stream: &mut TcpStream, status: u16, reason: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.0 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn register_then_fetch_round_trips() {
        let server = Arc::new(DirectoryServer::bind("127.0.0.1:0").unwrap());
        let addr = server.local_addr().unwrap();
        let run_server = Arc::clone(&server);
        std::thread::spawn(move || {
            let _ = run_server.run();
        });

        let node_id =
            client::register("127.0.0.1", addr.port(), "127.0.0.1", 9001, NodeRole::Guard)
                .unwrap();
        assert_eq!(node_id, 1);

        let list = client::fetch("127.0.0.1", addr.port()).unwrap();
        assert_eq!(list.guards.len(), 1);
        assert_eq!(list.guards[0].port, 9001);
    }
}
