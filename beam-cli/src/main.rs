//! beam — send or receive one file, meeting the peer by code.

mod cli;
mod progress;

use std::path::Path;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use beam_core::{BeamError, HttpRendezvousStore, TransferConfig, progress_channel};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let outcome = match cli.command {
        Command::Send { file, options } => send(&file, options.into_config(), cancel).await,
        Command::Receive { dst, code, options } => {
            receive(&dst, code, options.into_config(), cancel).await
        }
    };

    match outcome {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}: {e}", e.kind().label());
            std::process::exit(e.kind().exit_code());
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// First Ctrl-C cancels the session cleanly; a second one aborts.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("interrupt: cancelling transfer (press again to abort)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

async fn send(
    file: &Path,
    config: TransferConfig,
    cancel: CancellationToken,
) -> Result<(), BeamError> {
    let meta = tokio::fs::metadata(file)
        .await
        .map_err(|_| BeamError::User(format!("no such file: {}", file.display())))?;
    if !meta.is_file() {
        return Err(BeamError::User(format!(
            "not a regular file: {}",
            file.display()
        )));
    }
    config.validate()?;
    tracing::debug!(source = %file.display(), chunk_size = config.chunk_size, "starting send");

    let store = HttpRendezvousStore::new(&config);
    let (progress, progress_rx) = progress_channel();
    let renderer = tokio::spawn(progress::render(progress_rx));

    let result = beam_core::run_sender(
        &config,
        &store,
        file,
        progress,
        |code| println!("Share this code with the receiver: {code}"),
        cancel,
    )
    .await;

    let summary = renderer.await.ok().flatten();
    match result {
        Ok(_) => {
            if let Some(summary) = summary {
                println!("{}", progress::summary_line("sent", &summary));
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn receive(
    dst: &Path,
    code: Option<String>,
    config: TransferConfig,
    cancel: CancellationToken,
) -> Result<(), BeamError> {
    if dst.is_file() {
        return Err(BeamError::User(format!(
            "destination already exists: {}",
            dst.display()
        )));
    }
    config.validate()?;

    let code = match code {
        Some(code) => code,
        None => prompt_code().await?,
    };
    beam_core::validate_code(&code)?;
    tracing::debug!(destination = %dst.display(), "starting receive");

    let store = HttpRendezvousStore::new(&config);
    let (progress, progress_rx) = progress_channel();
    let renderer = tokio::spawn(progress::render(progress_rx));

    let result =
        beam_core::run_receiver(&config, &store, &code, dst, progress, cancel).await;

    let summary = renderer.await.ok().flatten();
    match result {
        Ok(path) => {
            if let Some(summary) = summary {
                println!("{}", progress::summary_line("received", &summary));
            }
            println!("saved to {}", path.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn prompt_code() -> Result<String, BeamError> {
    tokio::task::spawn_blocking(|| -> Result<String, BeamError> {
        use std::io::Write;
        print!("Enter code: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .map_err(|_| BeamError::User("code prompt interrupted".to_string()))?
}
