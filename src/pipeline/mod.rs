// SPDX-License-Identifier: Apache-2.0

//! Wires the tail reader, archive processor and enrichment chain to the forwarder.
//!
//! All blocking work runs on one coordinator thread. The forwarder flush loop runs
//! on the tokio runtime and shares only the record buffer with it.

mod coordinator;
mod settings;
pub mod status;

pub use coordinator::{Coordinator, TailTick};
pub use settings::PipelineSettings;
pub use status::{RunState, Status};

use std::time::Duration;
use thiserror::Error;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info};

use crate::bounded_channel::bounded;
use crate::forwarder::{Forwarder, RecordBuffer};
use crate::init::wait;

// Forwarder events queued for the coordinator before new ones are dropped
const EVENT_QUEUE_SIZE: usize = 1_000;

// Extra time allowed on top of the forwarder's shutdown budget
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Position(#[from] crate::position::Error),

    #[error(transparent)]
    Tail(#[from] crate::tail::Error),

    #[error(transparent)]
    Archive(#[from] crate::archive::Error),

    #[error(transparent)]
    Forwarder(#[from] crate::forwarder::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Run the pipeline until `cancel` fires or a task fails.
///
/// Startup errors (corrupt position store, locked processing state, bad
/// configuration) are returned before anything is spawned.
pub async fn run(
    settings: PipelineSettings,
    cancel: CancellationToken,
) -> std::result::Result<(), BoxError> {
    crate::crypto::init_crypto_provider()?;

    let buffer = RecordBuffer::shared(settings.forwarder.buffer_max_bytes);
    let (nudge_tx, nudge_rx) = bounded(1);
    let (event_tx, event_rx) = bounded(EVENT_QUEUE_SIZE);

    let shutdown_timeout = settings.forwarder.shutdown_flush_timeout * 2 + SHUTDOWN_GRACE;
    let forwarder =
        Forwarder::new(settings.forwarder.clone(), buffer.clone())?.with_events(event_tx);
    let coordinator = Coordinator::new(settings, buffer, nudge_tx, event_rx)?;

    let mut tasks: JoinSet<std::result::Result<(), BoxError>> = JoinSet::new();
    tasks.spawn(forwarder.run(nudge_rx, cancel.clone()));

    let coord_cancel = cancel.clone();
    let coord_handle = std::thread::Builder::new()
        .name("tailship-coordinator".to_string())
        .spawn(move || coordinator.run(coord_cancel))?;
    tasks.spawn(async move {
        match tokio::task::spawn_blocking(move || coord_handle.join()).await {
            Ok(Ok(())) => {
                debug!("Coordinator thread joined successfully");
                Ok(())
            }
            Ok(Err(_)) => Err("coordinator thread panicked".into()),
            Err(e) => Err(e.into()),
        }
    });

    info!("Pipeline started");

    let mut result = Ok(());
    select! {
        _ = cancel.cancelled() => {}
        e = wait::wait_for_any_task(&mut tasks) => {
            if let Err(e) = e {
                error!(error = %e, "Pipeline task failed, shutting down");
                result = Err(e);
            }
            cancel.cancel();
        }
    }

    let waited = wait::wait_for_tasks_with_timeout(&mut tasks, shutdown_timeout).await;
    info!("Pipeline stopped");
    result.and(waited)
}
