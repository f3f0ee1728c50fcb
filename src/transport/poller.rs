//! Long-polling loop
//!
//! Interactions are sharded over worker queues by user id: one user's
//! interactions are handled in arrival order, different users run
//! concurrently. The poll loop never waits on a worker; when a shard's
//! queue is full the interaction is logged and dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::telegram::classify;
use super::UpdateSource;
use crate::redirect::{Interaction, RedirectMachine};

const QUEUE_DEPTH: usize = 256;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn shard_for(user_id: i64, workers: usize) -> usize {
    user_id.rem_euclid(workers as i64) as usize
}

fn spawn_workers(
    machine: Arc<RedirectMachine>,
    workers: usize,
) -> (Vec<mpsc::Sender<Interaction>>, Vec<JoinHandle<()>>) {
    (0..workers)
        .map(|worker| {
            let (tx, mut rx) = mpsc::channel::<Interaction>(QUEUE_DEPTH);
            let machine = machine.clone();
            let handle = tokio::spawn(async move {
                while let Some(interaction) = rx.recv().await {
                    let outcome = machine.handle(interaction).await;
                    tracing::debug!(worker, ?outcome, "interaction done");
                }
            });
            (tx, handle)
        })
        .unzip()
}

/// Queue an interaction on its user's shard without waiting
fn dispatch(queues: &[mpsc::Sender<Interaction>], interaction: Interaction) -> bool {
    let shard = shard_for(interaction.user_id(), queues.len());
    match queues[shard].try_send(interaction) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            tracing::warn!(
                shard,
                user_id = dropped.user_id(),
                kind = dropped.kind(),
                "worker queue full, dropping interaction"
            );
            false
        }
        Err(TrySendError::Closed(dropped)) => {
            tracing::error!(
                shard,
                user_id = dropped.user_id(),
                kind = dropped.kind(),
                "worker queue closed, dropping interaction"
            );
            false
        }
    }
}

/// Poll until `shutdown` resolves, then confirm the offset and drain the
/// worker queues
pub async fn run_polling<S>(
    source: Arc<S>,
    machine: Arc<RedirectMachine>,
    workers: usize,
    shutdown: impl Future<Output = ()>,
) where
    S: UpdateSource + 'static,
{
    let workers = workers.max(1);
    let (queues, handles) = spawn_workers(machine, workers);

    tokio::pin!(shutdown);
    let mut offset = 0i64;
    let mut backoff = Duration::from_secs(1);

    tracing::info!(workers, "polling for updates");

    loop {
        let updates = tokio::select! {
            _ = &mut shutdown => break,
            result = source.fetch(offset) => result,
        };

        let updates = match updates {
            Ok(updates) => {
                backoff = Duration::from_secs(1);
                updates
            }
            Err(err) => {
                tracing::warn!(error = %err, retry_in = ?backoff, "getUpdates failed");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(interaction) = classify(&update, source.bot_username()) else {
                tracing::trace!(update_id = update.update_id, "ignoring update");
                continue;
            };
            dispatch(&queues, interaction);
        }
    }

    // Without this the last batch is delivered again on the next start.
    if offset > 0 {
        match source.confirm(offset).await {
            Ok(()) => tracing::debug!(offset, "offset confirmed"),
            Err(err) => tracing::warn!(error = %err, offset, "failed to confirm offset"),
        }
    }

    tracing::info!("shutting down, draining workers");
    drop(queues);
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "worker task failed");
        }
    }
}
