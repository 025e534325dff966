//! `pq-ntor-directory`: serve the node directory (spec §4.6 / §6).

use clap::Parser;
use pq_ntor::config::DirectoryCli;
use pq_ntor::directory::DirectoryServer;
use pq_ntor::error::Result;
use std::sync::Arc;

fn main() {
    let cli = DirectoryCli::parse();
    pq_ntor::config::init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, code = ?e.code(), "directory failed");
        std::process::exit(1);
    }
}

fn run(cli: DirectoryCli) -> Result<()> {
    let server = Arc::new(DirectoryServer::bind(("0.0.0.0", cli.port))?);
    tracing::info!(port = cli.port, "directory listening");
    server.run()
}
