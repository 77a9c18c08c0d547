// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background tasks: the refresh worker and the expiry sweeper.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::SessionManager;

/// Spawn the refresh worker and the expiry sweeper. Both stop on `cancel`.
///
/// The refresh queue can only be drained once, so a second call spawns
/// just the sweeper.
pub fn spawn_workers(manager: &SessionManager, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);
    match manager.take_refresh_queue() {
        Some(queue) => handles.push(tokio::spawn(refresh_worker(
            manager.clone(),
            queue,
            cancel.clone(),
        ))),
        None => warn!("refresh worker already running"),
    }
    handles.push(tokio::spawn(expiry_sweeper(manager.clone(), cancel)));
    handles
}

async fn refresh_worker(
    manager: SessionManager,
    mut queue: tokio::sync::mpsc::Receiver<crate::manager::RefreshJob>,
    cancel: CancellationToken,
) {
    info!("refresh worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            job = queue.recv() => {
                let Some(job) = job else { break };
                let manager = manager.clone();
                let cancel = cancel.clone();
                // Each re-login may spend a while in backoff, so jobs run side by side.
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        result = manager.reauthenticate(&job.user_id, job.broker) => match result {
                            Ok(snapshot) => debug!(
                                user_id = %job.user_id,
                                broker = %job.broker,
                                state = %snapshot.state,
                                "re-login finished"
                            ),
                            Err(e) => warn!(
                                user_id = %job.user_id,
                                broker = %job.broker,
                                error = %e,
                                "background re-login failed"
                            ),
                        },
                    }
                });
            }
        }
    }
    info!("refresh worker stopped");
}

async fn expiry_sweeper(manager: SessionManager, cancel: CancellationToken) {
    let period = manager.sweep_interval().max(std::time::Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match manager.expire_due().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "expired sessions swept"),
                    Err(e) => warn!(error = %e, "expiry sweep failed"),
                }
            }
        }
    }
    debug!("expiry sweeper stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use brokerlink_core::{BrokerKind, SessionState, TradingPreference, UserId};

    use super::*;
    use crate::manager::testing::Fixture;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_expires_and_worker_logs_back_in() {
        let fx = Fixture::new().await;
        let alice = UserId::parse("alice").unwrap();
        fx.store_credential(&alice).await;
        let adapter = fx.adapter();
        let manager = fx.manager(adapter.clone());
        let mut pref = TradingPreference::defaults_for(alice.clone());
        pref.auto_login = true;
        manager.update_preferences(pref).await.unwrap();
        manager.connect(&alice, BrokerKind::Zerodha).await.unwrap();

        let mut events = manager.subscribe();
        let cancel = CancellationToken::new();
        let handles = spawn_workers(&manager, cancel.clone());

        fx.clock.advance(chrono::Duration::hours(8));
        // The default sweep interval is long; trigger one directly.
        assert_eq!(manager.expire_due().await.unwrap(), 1);

        let reconnected = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.state == SessionState::Connected {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reconnected.user_id, alice);
        assert_eq!(adapter.auth_calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn second_spawn_only_starts_the_sweeper() {
        let fx = Fixture::new().await;
        let manager = fx.manager(fx.adapter());
        let cancel = CancellationToken::new();
        assert_eq!(spawn_workers(&manager, cancel.clone()).len(), 2);
        assert_eq!(spawn_workers(&manager, cancel.clone()).len(), 1);
        cancel.cancel();
    }
}
