//! CLI surfaces (spec §6, informative): one `clap` derive struct per
//! binary, grounded in `botho-wallet`'s `Cli` pattern. Defaults let all
//! three binaries run against `127.0.0.1` with no flags (spec §8 seed
//! scenarios).

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Classic,
    Pq,
    Hybrid,
}

#[derive(Parser, Debug)]
#[command(name = "pq-ntor-client")]
#[command(about = "Build a 3-hop pq-ntor circuit and fetch a URL through it")]
pub struct ClientCli {
    /// Directory host
    #[arg(short = 'd', long, default_value = "127.0.0.1")]
    pub directory_host: String,

    /// Directory port
    #[arg(short = 'p', long, default_value_t = 9030)]
    pub directory_port: u16,

    /// URL to fetch through the circuit, e.g. http://127.0.0.1:8000/
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Handshake variant to use for every hop
    #[arg(long, value_enum, default_value_t = Mode::Pq)]
    pub mode: Mode,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(name = "pq-ntor-directory")]
#[command(about = "Serve the node directory (GET /nodes, POST /register)")]
pub struct DirectoryCli {
    /// Port the directory HTTP service listens on
    #[arg(short = 'p', long, default_value_t = 9030)]
    pub port: u16,

    /// Reserved for the external static test-HTTP-origin collaborator
    /// (spec §1 explicitly scopes it out of this system); accepted so the
    /// CLI surface matches spec §6 but otherwise unused.
    #[arg(short = 't', long)]
    pub test_origin_port: Option<u16>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RelayRole {
    Guard,
    Middle,
    Exit,
}

#[derive(Parser, Debug)]
#[command(name = "pq-ntor-relay")]
#[command(about = "Run one hop (Guard, Middle, or Exit) of the circuit protocol")]
pub struct RelayCli {
    /// Role this process plays in the circuit
    #[arg(short = 'r', long, value_enum)]
    pub role: RelayRole,

    /// Port this relay listens on
    #[arg(short = 'p', long)]
    pub port: u16,

    /// 40-hex-char (20-byte) relay identity bound into the handshake transcript
    #[arg(long)]
    pub identity: String,

    /// Handshake variant this relay expects to terminate
    #[arg(long, value_enum, default_value_t = Mode::Pq)]
    pub mode: Mode,

    /// Directory host to register with on startup
    #[arg(short = 'd', long, default_value = "127.0.0.1")]
    pub directory_host: String,

    /// Directory port to register with on startup
    #[arg(long, default_value_t = 9030)]
    pub directory_port: u16,

    #[arg(short, long)]
    pub verbose: bool,
}

pub fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .try_init();
}
