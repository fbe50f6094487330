//! pgscope - validated queries and schema resources for PostgreSQL over stdio.
//!
//! Reads one JSON request per line from stdin and writes one JSON response
//! per line to stdout. Logs go to stderr.

mod args;

use std::future::Future;
use std::pin::pin;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pgscope_core::logging::init_logging;
use pgscope_core::{DatabaseSettings, Dispatcher, PgScopeState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use args::Args;

fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match args.settings() {
        Ok(settings) => settings,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::from(1);
        }
    };

    let _logging_guard = init_logging(args.log_config());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting pgscope");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to create tokio runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Failed to start pgscope");
            ExitCode::from(1)
        }
    }
}

async fn run(settings: DatabaseSettings) -> Result<()> {
    let state = Arc::new(PgScopeState::new(settings).context("Invalid configuration")?);
    state.verify_connection().await.context("Could not connect to the database")?;
    let sweeper = state.start_maintenance();

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&state)));
    let requests_token = CancellationToken::new();
    let (responses, rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_responses(rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    let responses = responses.clone();
                    let token = requests_token.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = dispatcher.handle_line(&line, &token).await {
                            // The writer only stops once every sender is gone
                            let _ = responses.send(response);
                        }
                    });
                }
                Ok(None) => {
                    tracing::info!(pending = in_flight.len(), "Input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read request");
                    requests_token.cancel();
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                requests_token.cancel();
                break;
            }
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "Request task failed");
                }
            }
        }
    }

    // Let running requests finish (or observe cancellation) before closing
    drain(&mut in_flight, &requests_token, interrupted()).await;
    requests_token.cancel();
    drop(responses);
    if let Err(e) = writer.await {
        tracing::error!(error = %e, "Response writer failed");
    }

    state.shutdown();
    let _ = sweeper.await;
    tracing::info!("pgscope stopped");
    Ok(())
}

/// Wait for every request task. `interrupt` firing cancels the ones still
/// running instead of waiting them out.
async fn drain(
    in_flight: &mut JoinSet<()>,
    token: &CancellationToken,
    interrupt: impl Future<Output = ()>,
) {
    let mut interrupt = pin!(interrupt);
    while !in_flight.is_empty() {
        tokio::select! {
            finished = in_flight.join_next() => {
                if let Some(Err(e)) = finished {
                    tracing::error!(error = %e, "Request task failed");
                }
            }
            _ = &mut interrupt, if !token.is_cancelled() => {
                tracing::info!(pending = in_flight.len(), "Interrupted while draining");
                token.cancel();
            }
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Write responses to stdout, one per line, in completion order.
async fn write_responses(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(response) = rx.recv().await {
        let written = async {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::error!(error = %e, "Failed to write response");
            break;
        }
    }
}
