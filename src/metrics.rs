//! Prometheus metrics for the watcher node.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct WatcherMetrics {
    pub last_handled_native_block: IntGauge,
    pub last_handled_underlying_block: IntGauge,
    pub tracked_agents: IntGauge,
    pub native_events_handled: IntCounter,
    pub underlying_transactions_scanned: IntCounter,
    pub challenges_submitted: IntCounterVec,
    pub liquidations_started: IntCounter,
    pub liquidations_ended: IntCounter,
    pub expected_races_swallowed: IntCounter,
    pub uncaught_task_errors: IntCounter,
    pub actor_cycle_errors: IntCounterVec,
}

impl WatcherMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            last_handled_native_block: register_int_gauge_with_registry!(
                "watcher_last_handled_native_block",
                "Last native chain block whose events were applied to the replica",
                registry,
            )
            .unwrap(),
            last_handled_underlying_block: register_int_gauge_with_registry!(
                "watcher_last_handled_underlying_block",
                "Last underlying chain block scanned for agent transactions",
                registry,
            )
            .unwrap(),
            tracked_agents: register_int_gauge_with_registry!(
                "watcher_tracked_agents",
                "Number of agent vaults currently tracked in the replica",
                registry,
            )
            .unwrap(),
            native_events_handled: register_int_counter_with_registry!(
                "watcher_native_events_handled",
                "Total native chain events applied to the replica",
                registry,
            )
            .unwrap(),
            underlying_transactions_scanned: register_int_counter_with_registry!(
                "watcher_underlying_transactions_scanned",
                "Total underlying chain transactions scanned by the challenger",
                registry,
            )
            .unwrap(),
            challenges_submitted: register_int_counter_vec_with_registry!(
                "watcher_challenges_submitted",
                "Total challenges submitted, by challenge kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            liquidations_started: register_int_counter_with_registry!(
                "watcher_liquidations_started",
                "Total liquidation-start transactions submitted",
                registry,
            )
            .unwrap(),
            liquidations_ended: register_int_counter_with_registry!(
                "watcher_liquidations_ended",
                "Total liquidation-end transactions submitted",
                registry,
            )
            .unwrap(),
            expected_races_swallowed: register_int_counter_with_registry!(
                "watcher_expected_races_swallowed",
                "Total benign lost races converted into scope exits",
                registry,
            )
            .unwrap(),
            uncaught_task_errors: register_int_counter_with_registry!(
                "watcher_uncaught_task_errors",
                "Total unexpected errors from scoped background tasks",
                registry,
            )
            .unwrap(),
            actor_cycle_errors: register_int_counter_vec_with_registry!(
                "watcher_actor_cycle_errors",
                "Total recoverable errors per actor poll cycle, by actor",
                &["actor"],
                registry,
            )
            .unwrap(),
        })
    }

    pub fn new_for_testing() -> Arc<Self> {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
