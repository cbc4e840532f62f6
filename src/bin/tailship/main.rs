// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tailship::init::args::{Arguments, Commands, RunArgs};
use tailship::init::config::load_config;
use tailship::init::logging::setup_logging;
use tailship::init::wait;
use tailship::pipeline::{self, PipelineSettings};

// The pipeline enforces its own shutdown deadline, this only guards against a hang
const FINAL_WAIT_SLACK: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(Commands::CheckConfig(run)) => match load_settings(&run) {
            Ok(settings) => print_summary(&settings),
            Err(e) => {
                eprintln!("ERROR: {}", e);
                return ExitCode::from(1);
            }
        },
        Some(Commands::Start(run)) => {
            let settings = match load_settings(&run) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return ExitCode::from(1);
                }
            };

            let _guard = match setup_logging(opt.log_format, &get_version()) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            match run_pipeline(settings) {
                Ok(_) => {}
                Err(e) => {
                    error!(error = e, "Failed to run pipeline.");
                    return ExitCode::from(1);
                }
            }
        }
        _ => {
            // it shouldn't be possible to get here since we mark a subcommand as
            // required
            eprintln!("Must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

fn load_settings(run: &RunArgs) -> Result<PipelineSettings, Box<dyn Error + Send + Sync>> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(state_dir) = &run.state_dir {
        config.state_dir = state_dir.clone();
    }
    Ok(config.into_settings()?)
}

fn print_summary(settings: &PipelineSettings) {
    println!("configuration OK");
    println!("  state dir:   {}", settings.state_dir.display());
    for root in &settings.tail.roots {
        println!("  tail root:   {} ({})", root.path.display(), root.tag);
    }
    match &settings.archive {
        Some(archive) => {
            for root in &archive.roots {
                println!("  archive root: {} ({})", root.path.display(), root.tag);
            }
        }
        None => println!("  archives:    disabled"),
    }
    // URL only, credentials are never printed
    println!("  destination: {}", settings.forwarder.url());
}

#[tokio::main]
async fn run_pipeline(settings: PipelineSettings) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut join_set = JoinSet::new();
    let final_wait = settings.forwarder.shutdown_flush_timeout * 2 + FINAL_WAIT_SLACK * 2;

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        join_set.spawn(pipeline::run(settings, token));
    }

    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
            cancel_token.cancel();
        },
        e = wait::wait_for_any_task(&mut join_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of pipeline."),
                Err(e) => return Err(e),
            }
        },
    }

    wait::wait_for_tasks_with_timeout(&mut join_set, final_wait).await?;

    Ok(())
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sig_term, mut sig_int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            warn!("Unable to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    let _ = tokio::signal::ctrl_c().await;
}
