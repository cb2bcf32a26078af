use clap::Parser;
use tokio_util::sync::CancellationToken;

use scanhook_core::config;

mod cli;
mod coordinator;
mod logging;
mod managers;
mod signals;

use cli::{Cli, Commands};
use coordinator::Coordinator;

fn print_version(branch: bool, commit: bool, tag: bool, arch: bool) {
    let any = branch || commit || tag || arch;
    if !any {
        println!("scanhookd {}", scanhook_core::VERSION);
        println!("branch:  {}", option_env!("SCANHOOK_BUILD_BRANCH").unwrap_or("unknown"));
        println!("commit:  {}", option_env!("SCANHOOK_BUILD_COMMIT").unwrap_or("unknown"));
        println!("tag:     {}", option_env!("SCANHOOK_BUILD_TAG").unwrap_or("unknown"));
        println!("arch:    {}", std::env::consts::ARCH);
        return;
    }
    if branch {
        println!("{}", option_env!("SCANHOOK_BUILD_BRANCH").unwrap_or("unknown"));
    }
    if commit {
        println!("{}", option_env!("SCANHOOK_BUILD_COMMIT").unwrap_or("unknown"));
    }
    if tag {
        println!("{}", option_env!("SCANHOOK_BUILD_TAG").unwrap_or("unknown"));
    }
    if arch {
        println!("{}", std::env::consts::ARCH);
    }
}

/// Loads config, wires the coordinator, and serves until the process
/// context is cancelled. Returns the process exit code.
async fn run(cli: &Cli) -> i32 {
    let config = match config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };

    let _log_guards = logging::init(&config.server.log);
    tracing::info!(listen = %config.server.webhook.listen, "starting scanhook orchestrator");

    let coordinator = match Coordinator::new(&config).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build coordinator");
            return 1;
        }
    };

    let shutdown = CancellationToken::new();
    signals::install(shutdown.clone());

    if let Err(e) = coordinator.serve(&config, shutdown).await {
        tracing::error!(error = %e, "orchestrator exited with error");
        return 1;
    }

    tracing::info!("shutdown complete");
    0
}

fn main() {
    let cli = Cli::parse();

    if let Some(Commands::Version { branch, commit, tag, arch }) = &cli.command {
        print_version(*branch, *commit, *tag, *arch);
        return;
    }

    let exit_code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(run(&cli));

    std::process::exit(exit_code);
}
