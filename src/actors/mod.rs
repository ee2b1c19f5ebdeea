//! Actor runtime: the poll loop shared by the challenger, liquidator and
//! system keeper, plus node wiring.
//!
//! Each actor is a `step()` driven by a fixed-interval timer. Recoverable
//! errors (transport hiccups, pending attestation rounds) are logged and
//! retried on the next tick; anything else aborts the actor loop so the
//! failure is visible instead of silently looping.

pub mod challenger;
pub mod liquidator;
pub mod system_keeper;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::{
    AssetManagerClient, AttestationClient, LedgerClient, UnderlyingIndexerClient,
};
use crate::config::{ChallengerConfig, WatcherNodeConfig};
use crate::error::WatcherResult;
use crate::metrics::WatcherMetrics;
use crate::state::tracked::TrackedState;

pub use challenger::Challenger;
pub use liquidator::Liquidator;
pub use system_keeper::SystemKeeper;

/// Bundle of client handles shared by all actors.
#[derive(Clone)]
pub struct ActorClients {
    pub ledger: Arc<dyn LedgerClient>,
    pub underlying: Arc<dyn UnderlyingIndexerClient>,
    pub attestation: Arc<dyn AttestationClient>,
    pub asset_manager: Arc<dyn AssetManagerClient>,
}

/// A periodically-polled worker.
#[async_trait::async_trait]
pub trait Actor: Send {
    fn name(&self) -> &'static str;

    fn poll_interval(&self) -> Duration;

    /// One poll cycle.
    async fn step(&mut self) -> WatcherResult<()>;
}

/// Drive an actor until cancellation or a non-recoverable error.
pub fn spawn_actor(
    mut actor: Box<dyn Actor>,
    cancel: CancellationToken,
    metrics: Arc<WatcherMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = actor.name();
        let mut interval = tokio::time::interval(actor.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("[{name}] actor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{name}] actor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    match actor.step().await {
                        Ok(()) => {}
                        Err(err) if err.is_recoverable() => {
                            warn!("[{name}] recoverable cycle error: {err}");
                            metrics.actor_cycle_errors.with_label_values(&[name]).inc();
                        }
                        Err(err) => {
                            error!("[{name}] fatal error, stopping actor: {err}");
                            return;
                        }
                    }
                }
            }
        }
    })
}

/// Each actor consumes the event stream through its own replica, so the
/// watermarks stay independent.
async fn fresh_state(
    config: &WatcherNodeConfig,
    clients: &ActorClients,
) -> WatcherResult<Arc<RwLock<TrackedState>>> {
    let state = TrackedState::initialize(
        clients.asset_manager.as_ref(),
        config.native_chain.asset_manager_address,
        config.native_chain.start_block,
    )
    .await?;
    Ok(Arc::new(RwLock::new(state)))
}

/// Spawn the configured actor set. Returns the actor task handles;
/// cancelling `cancel` shuts everything down.
pub async fn run_actors(
    config: &WatcherNodeConfig,
    clients: ActorClients,
    metrics: Arc<WatcherMetrics>,
    cancel: CancellationToken,
) -> WatcherResult<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    if config.actors.challenger {
        let challenger = Challenger::new(
            clients.clone(),
            fresh_state(config, &clients).await?,
            ChallengerConfig::from_node_config(config),
            metrics.clone(),
        );
        handles.push(spawn_actor(Box::new(challenger), cancel.clone(), metrics.clone()));
    }
    if config.actors.liquidator {
        let liquidator = Liquidator::new(
            clients.clone(),
            fresh_state(config, &clients).await?,
            config.poll_interval(),
            config.native_chain.max_block_range,
            metrics.clone(),
        );
        handles.push(spawn_actor(Box::new(liquidator), cancel.clone(), metrics.clone()));
    }
    if config.actors.system_keeper {
        let keeper = SystemKeeper::new(
            clients.clone(),
            fresh_state(config, &clients).await?,
            config.poll_interval(),
            config.native_chain.max_block_range,
            metrics.clone(),
        );
        handles.push(spawn_actor(Box::new(keeper), cancel.clone(), metrics.clone()));
    }
    info!(actors = handles.len(), "watcher node running");
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatcherError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingActor {
        steps: Arc<AtomicUsize>,
        fail_after: Option<usize>,
        recoverable: bool,
    }

    #[async_trait::async_trait]
    impl Actor for CountingActor {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn step(&mut self) -> WatcherResult<()> {
            let n = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_after {
                Some(limit) if n > limit && self.recoverable => {
                    Err(WatcherError::Rpc("flaky".into()))
                }
                Some(limit) if n > limit => Err(WatcherError::StateDivergence("broken".into())),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_actor_loop_polls_until_cancelled() {
        let steps = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn_actor(
            Box::new(CountingActor {
                steps: steps.clone(),
                fail_after: None,
                recoverable: false,
            }),
            cancel.clone(),
            crate::metrics::WatcherMetrics::new_for_testing(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(steps.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_recoverable_error_keeps_actor_running() {
        let steps = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let metrics = crate::metrics::WatcherMetrics::new_for_testing();
        let handle = spawn_actor(
            Box::new(CountingActor {
                steps: steps.clone(),
                fail_after: Some(1),
                recoverable: true,
            }),
            cancel.clone(),
            metrics.clone(),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(steps.load(Ordering::SeqCst) >= 3);
        assert!(metrics.actor_cycle_errors.with_label_values(&["counting"]).get() >= 1);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_actor() {
        let steps = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn_actor(
            Box::new(CountingActor {
                steps: steps.clone(),
                fail_after: Some(1),
                recoverable: false,
            }),
            cancel.clone(),
            crate::metrics::WatcherMetrics::new_for_testing(),
        );
        handle.await.unwrap();
        // First tick succeeds, second fails fatally, loop ends.
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }
}
