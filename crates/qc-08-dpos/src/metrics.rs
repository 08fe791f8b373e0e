//! # Masternode Metrics
//!
//! Prometheus metrics for the masternode subsystem.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-08-dpos = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `dpos_blocks_applied_total` - Blocks folded into the masternode state
//! - `dpos_transitions_total` - Masternode transitions applied (by kind)
//! - `dpos_operations_skipped_total` - Masternode transactions skipped (by reason)
//! - `dpos_heartbeats_total` - Heartbeats received (by outcome)
//! - `dpos_vice_blocks_approved_total` - Vice-blocks that reached quorum
//! - `dpos_instant_txs_total` - Instant transactions decided (by status)
//! - `dpos_replay_latency_seconds` - Histogram of reindex / reorg replay times

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, CounterVec, Histogram,
    IntCounter,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Blocks folded into the chain-derived state
    pub static ref BLOCKS_APPLIED: IntCounter = register_int_counter!(
        "dpos_blocks_applied_total",
        "Total number of blocks applied to the masternode state"
    )
    .expect("Failed to create BLOCKS_APPLIED metric");

    /// Masternode transitions, labeled by kind
    pub static ref TRANSITIONS: CounterVec = register_counter_vec!(
        "dpos_transitions_total",
        "Total number of masternode transitions applied",
        &["kind"]
    )
    .expect("Failed to create TRANSITIONS metric");

    /// Masternode transactions skipped during block application
    pub static ref OPERATIONS_SKIPPED: CounterVec = register_counter_vec!(
        "dpos_operations_skipped_total",
        "Total number of masternode transactions skipped",
        &["reason"]
    )
    .expect("Failed to create OPERATIONS_SKIPPED metric");

    /// Heartbeats received, labeled by outcome
    pub static ref HEARTBEATS: CounterVec = register_counter_vec!(
        "dpos_heartbeats_total",
        "Total number of heartbeats received",
        &["outcome"]
    )
    .expect("Failed to create HEARTBEATS metric");

    /// Vice-blocks approved by round voting
    pub static ref VICE_BLOCKS_APPROVED: IntCounter = register_int_counter!(
        "dpos_vice_blocks_approved_total",
        "Total number of vice-blocks approved"
    )
    .expect("Failed to create VICE_BLOCKS_APPROVED metric");

    /// Instant transactions decided, labeled by status
    pub static ref INSTANT_TXS: CounterVec = register_counter_vec!(
        "dpos_instant_txs_total",
        "Total number of instant transactions decided",
        &["status"]
    )
    .expect("Failed to create INSTANT_TXS metric");

    /// Histogram of replay latency
    pub static ref REPLAY_LATENCY: Histogram = register_histogram!(
        "dpos_replay_latency_seconds",
        "Time taken to replay blocks into the masternode state in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create REPLAY_LATENCY metric");
}

#[cfg(feature = "metrics")]
pub fn record_block_applied() {
    BLOCKS_APPLIED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_transition(kind: &str) {
    TRANSITIONS.with_label_values(&[kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_operation_skipped(reason: &str) {
    OPERATIONS_SKIPPED.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_heartbeat(outcome: &str) {
    HEARTBEATS.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_vice_block_approved() {
    VICE_BLOCKS_APPROVED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_instant_tx(status: &str) {
    INSTANT_TXS.with_label_values(&[status]).inc();
}

/// Record replay latency
#[cfg(feature = "metrics")]
pub fn record_replay_latency(seconds: f64) {
    REPLAY_LATENCY.observe(seconds);
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_block_applied() {}

#[cfg(not(feature = "metrics"))]
pub fn record_transition(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_operation_skipped(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_heartbeat(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_vice_block_approved() {}

#[cfg(not(feature = "metrics"))]
pub fn record_instant_tx(_status: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_replay_latency(_seconds: f64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_noop_when_disabled() {
        record_block_applied();
        record_transition("announce");
        record_operation_skipped("not_owner");
        record_heartbeat("accepted");
        record_vice_block_approved();
        record_instant_tx("finalized");
        record_replay_latency(0.5);
    }
}
