//! Process entry point: parses CLI arguments, wires up logging, registers
//! the built-in operations and strategies, then dispatches to the mode
//! supervisor the subcommand selected.

mod args;

use clap::Parser;

use args::{Cli, DeployArgs, ModeArgs};
use skitter_deploy::modes::{local, master, worker};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn merged_workers(
    positional: &[std::net::SocketAddr],
    file: Option<&std::path::Path>,
) -> std::io::Result<Vec<std::net::SocketAddr>> {
    let mut workers = positional.to_vec();
    if let Some(path) = file {
        workers.extend(args::read_worker_file(path)?);
    }
    Ok(workers)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    skitter_testkit::register_builtins();

    let result = match cli.mode {
        ModeArgs::Worker(worker_args) => {
            worker::run(worker::WorkerConfig {
                bind: worker_args.bind,
                masters: worker_args.masters,
                tags: worker_args.tags,
                shutdown_with_master: !worker_args.no_shutdown_with_master,
            })
            .await
        }
        ModeArgs::Master(master_args) => {
            let workers = merged_workers(&master_args.workers, master_args.worker_file.as_deref())
                .unwrap_or_else(|err| {
                    tracing::error!(error = %err, "failed to read --worker-file");
                    std::process::exit(1);
                });
            master::run(master::MasterConfig {
                bind: master_args.bind,
                workers,
                deploy: master_args.deploy,
                shutdown_with_workers: master_args.shutdown_with_workers,
            })
            .await
        }
        ModeArgs::Local(local_args) => match local::start(local::LocalConfig { deploy: local_args.deploy }).await {
            Ok(engine) => {
                // Local mode has no transport listener and nothing else to
                // wait on; keep the engine (and its workers) alive until
                // killed.
                std::mem::forget(engine);
                std::future::pending::<()>().await;
                unreachable!()
            }
            Err(err) => Err(err),
        },
        ModeArgs::Deploy(deploy_args) => run_deploy(deploy_args).await,
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

/// The `deploy` subcommand is a master that requires `deploy` to be set and
/// defaults to shutting down when a deployed-to worker disconnects (the
/// reverse default from `master`, since this mode is meant for a one-shot
/// CLI invocation rather than a long-running process).
async fn run_deploy(args: DeployArgs) -> Result<(), skitter_deploy::DeployError> {
    let workers = merged_workers(&args.workers, args.worker_file.as_deref()).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to read --worker-file");
        std::process::exit(1);
    });
    master::run(master::MasterConfig {
        bind: "127.0.0.1:0".parse().expect("static address always parses"),
        workers,
        deploy: Some(args.deploy),
        shutdown_with_workers: !args.no_shutdown_with_master,
    })
    .await
}
