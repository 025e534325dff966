//! `pq-ntor-relay`: run one hop (Guard, Middle, or Exit) of the circuit
//! protocol (spec §4.5 / §6).

use clap::Parser;
use pq_ntor::config::RelayCli;
use pq_ntor::error::{NetError, Result};
use pq_ntor::relay::{RelayNode, Role};
use std::net::TcpListener;
use std::sync::Arc;

fn main() {
    let cli = RelayCli::parse();
    pq_ntor::config::init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, code = ?e.code(), "relay failed");
        std::process::exit(1);
    }
}

fn run(cli: RelayCli) -> Result<()> {
    let role = match cli.role {
        pq_ntor::config::RelayRole::Guard => Role::Guard,
        pq_ntor::config::RelayRole::Middle => Role::Middle,
        pq_ntor::config::RelayRole::Exit => Role::Exit,
    };
    let relay_id = parse_identity(&cli.identity)?;

    let node = Arc::new(RelayNode::new(
        role,
        relay_id,
        cli.mode,
        cli.directory_host,
        cli.directory_port,
    ));

    let listener = TcpListener::bind(("0.0.0.0", cli.port))?;
    let node_id = node.register_with_directory("127.0.0.1", cli.port)?;
    tracing::info!(node_id, ?role, port = cli.port, "relay listening");

    node.run(listener)
}

fn parse_identity(s: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(s).map_err(|e| NetError::Directory(format!("bad identity hex: {e}")))?;
    if bytes.len() != 20 {
        return Err(NetError::Directory(format!(
            "identity must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}
