use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "skitter", about = "Strategy-parameterised distributed stream processing")]
pub struct Cli {
    #[command(subcommand)]
    pub mode: ModeArgs,
}

#[derive(Subcommand, Debug)]
pub enum ModeArgs {
    /// Start the registry, the worker runtime, and the transport; wait for a master to attach
    Worker(WorkerArgs),
    /// Start the registry, the transport, and the deployment engine
    Master(MasterArgs),
    /// Start every component in one address space, with no transport listener
    Local(LocalArgs),
    /// Connect to a set of already-running workers and deploy a workflow onto them
    Deploy(DeployArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct WorkerArgs {
    /// Master addresses to register with on startup
    pub masters: Vec<SocketAddr>,
    /// Address this worker listens on for control-plane connections
    #[clap(long, default_value = "127.0.0.1:7001")]
    pub bind: SocketAddr,
    /// Symbols advertised to masters
    #[clap(long = "tag")]
    pub tags: Vec<String>,
    /// Keep running after the registered master disconnects
    #[clap(long)]
    pub no_shutdown_with_master: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct MasterArgs {
    /// Worker addresses to connect to; failure to connect any one of them is fatal
    pub workers: Vec<SocketAddr>,
    /// Address this master listens on for control-plane connections
    #[clap(long, default_value = "127.0.0.1:7000")]
    pub bind: SocketAddr,
    /// Name of a registered workflow to deploy on startup
    #[clap(long)]
    pub deploy: Option<String>,
    /// File with one worker address per line, merged with positional addresses
    #[clap(long)]
    pub worker_file: Option<std::path::PathBuf>,
    /// Terminate the master as soon as any registered worker disconnects
    #[clap(long)]
    pub shutdown_with_workers: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct LocalArgs {
    /// Name of a registered workflow to deploy on startup
    #[clap(long)]
    pub deploy: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct DeployArgs {
    /// Worker addresses to connect to and deploy onto
    pub workers: Vec<SocketAddr>,
    /// Name of a registered workflow to deploy
    #[clap(long)]
    pub deploy: String,
    /// File with one worker address per line, merged with positional addresses
    #[clap(long)]
    pub worker_file: Option<std::path::PathBuf>,
    /// Keep running after a deployed-to worker disconnects
    #[clap(long)]
    pub no_shutdown_with_master: bool,
}

pub fn read_worker_file(path: &std::path::Path) -> std::io::Result<Vec<SocketAddr>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.parse().ok())
        .collect())
}
