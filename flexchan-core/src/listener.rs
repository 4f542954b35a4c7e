//! Membership feed → lifecycle manager dispatch.
//!
//! One task per notification. Handler failures are logged and counted; they
//! never stop the loop or delay later notifications.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::event::MembershipChange;
use crate::manager::LifecycleManager;

/// Totals for one run of [`run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub handled: u64,
    pub failed: u64,
}

/// Consume `events` until the sender side closes, then wait for in-flight
/// handlers to finish.
pub async fn run(
    manager: Arc<LifecycleManager>,
    events: mpsc::Receiver<MembershipChange>,
) -> ListenerStats {
    run_until(manager, events, std::future::pending()).await
}

/// Like [`run`], but also stops taking notifications once `shutdown`
/// completes. Notifications already queued are still handled, and every
/// started handler runs to completion before this returns.
pub async fn run_until<F>(
    manager: Arc<LifecycleManager>,
    mut events: mpsc::Receiver<MembershipChange>,
    shutdown: F,
) -> ListenerStats
where
    F: Future<Output = ()> + Send,
{
    let mut tasks: JoinSet<bool> = JoinSet::new();
    let mut stats = ListenerStats::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(change) = event else { break };
                spawn(&mut tasks, &manager, change);
            }
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                record(&mut stats, done);
            }
            () = &mut shutdown => {
                tracing::info!("Membership listener shutting down");
                events.close();
                while let Some(change) = events.recv().await {
                    spawn(&mut tasks, &manager, change);
                }
                break;
            }
        }
    }

    while let Some(done) = tasks.join_next().await {
        record(&mut stats, done);
    }
    tracing::info!(handled = stats.handled, failed = stats.failed, "Membership feed closed");
    stats
}

fn spawn(tasks: &mut JoinSet<bool>, manager: &Arc<LifecycleManager>, change: MembershipChange) {
    let manager = Arc::clone(manager);
    tasks.spawn(async move { handle(&manager, change).await });
}

async fn handle(manager: &LifecycleManager, change: MembershipChange) -> bool {
    match manager.on_member_moved(&change).await {
        Ok(actions) => {
            if !actions.is_empty() {
                tracing::debug!(workspace = %change.workspace_id, member = %change.member_id, ?actions, "Handled membership change");
            }
            true
        }
        Err(e) => {
            tracing::error!(
                workspace = %change.workspace_id,
                member = %change.member_id,
                previous = ?change.previous_room,
                new = ?change.new_room,
                error = %e,
                "Membership change dropped"
            );
            false
        }
    }
}

fn record(stats: &mut ListenerStats, done: Result<bool, tokio::task::JoinError>) {
    stats.handled += 1;
    match done {
        Ok(true) => {}
        Ok(false) => stats.failed += 1,
        Err(e) => {
            tracing::error!(error = %e, "Membership handler panicked");
            stats.failed += 1;
        }
    }
}
