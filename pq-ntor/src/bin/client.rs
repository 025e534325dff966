//! `pq-ntor-client`: fetch the node directory, build a 3-hop circuit, and
//! optionally relay one HTTP request through it (spec §4.4 / §6).

use clap::Parser;
use pq_ntor::client::CircuitBuilder;
use pq_ntor::config::ClientCli;
use pq_ntor::directory;
use pq_ntor::error::Result;

fn main() {
    let cli = ClientCli::parse();
    pq_ntor::config::init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, code = ?e.code(), "client failed");
        std::process::exit(1);
    }
}

fn run(cli: ClientCli) -> Result<()> {
    let nodes = directory::client::fetch(&cli.directory_host, cli.directory_port)?;
    tracing::info!(
        guards = nodes.guards.len(),
        middles = nodes.middles.len(),
        exits = nodes.exits.len(),
        "fetched directory"
    );

    let builder = CircuitBuilder::new(cli.mode);
    let mut circuit = builder.build_circuit(&nodes)?;
    println!(
        "circuit {} established through {} hops",
        circuit.circ_id,
        circuit.layer_count()
    );

    if let Some(url) = cli.url.as_deref() {
        let (host, port, path) = parse_url(url)?;
        builder.begin_stream(&mut circuit, &host, port)?;

        let request = format!("GET {path} HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\n\r\n");
        builder.send_data(&mut circuit, request.as_bytes())?;

        let mut buf = [0u8; 4096];
        loop {
            let n = builder.recv_data(&mut circuit, &mut buf)?;
            if n == 0 {
                break;
            }
            print!("{}", String::from_utf8_lossy(&buf[..n]));
        }
    }

    let stats = circuit.stats();
    tracing::info!(
        bytes_sent = stats.bytes_sent,
        bytes_received = stats.bytes_received,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "circuit stats"
    );
    Ok(())
}

fn parse_url(url: &str) -> Result<(String, u16, String)> {
    let without_scheme = url.strip_prefix("http://").unwrap_or(url);
    let (authority, path) = match without_scheme.split_once('/') {
        Some((a, p)) => (a, format!("/{p}")),
        None => (without_scheme, "/".to_string()),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse()
                .map_err(|_| pq_ntor::error::NetError::Directory(format!("bad port in {url}")))?,
        ),
        None => (authority.to_string(), 80u16),
    };
    Ok((host, port, path))
}
