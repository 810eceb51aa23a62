//! Tracing utilities for query, transaction and eager-load observability.
//!
//! Enable the `tracing` feature to emit events via the `tracing` crate.
//! These macros no-op when the feature is disabled, avoiding `#[cfg]` boilerplate
//! at every call site.

/// Emit a debug-level tracing event with the SQL text and parameter count.
///
/// ```ignore
/// quarry_trace_query!(&stmt.sql, stmt.params.len());
/// ```
#[macro_export]
macro_rules! quarry_trace_query {
    ($sql:expr, $param_count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %$sql, params = $param_count, "quarry.query");
    };
}

/// Emit an info-level tracing event for transaction lifecycle (begin, commit, rollback).
///
/// ```ignore
/// quarry_trace_tx!("begin", depth);
/// quarry_trace_tx!("savepoint", depth);
/// ```
#[macro_export]
macro_rules! quarry_trace_tx {
    ($event:literal, $depth:expr) => {
        #[cfg(feature = "tracing")]
        tracing::info!(event = $event, depth = $depth, "quarry.transaction");
    };
}

/// Emit a debug-level event as an eager load moves through its phases.
///
/// ```ignore
/// quarry_trace_load!("batched", "comments", keys.len());
/// ```
#[macro_export]
macro_rules! quarry_trace_load {
    ($phase:literal, $relation:expr, $count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            phase = $phase,
            relation = %$relation,
            count = $count,
            "quarry.eager_load"
        );
    };
}
