//! Metrics declaration.
//!
//! Names are registered lazily with descriptions on first use. Install any
//! `metrics` recorder (for example a Prometheus exporter) to collect them.

use lazy_static::lazy_static;

lazy_static! {
    /// Cache lookups by outcome, labelled with `status` and `class`.
    pub static ref CACHE_LOOKUPS: &'static str = {
        metrics::describe_counter!(
            "cellgate_cache_lookups_total",
            "Total number of cache lookups by outcome."
        );
        "cellgate_cache_lookups_total"
    };
    /// Lookups that served a retained entry because the upstream failed.
    pub static ref CACHE_ERROR_FALLBACKS: &'static str = {
        metrics::describe_counter!(
            "cellgate_cache_error_fallbacks_total",
            "Total number of stale entries served in place of an upstream failure."
        );
        "cellgate_cache_error_fallbacks_total"
    };
    /// Duration of upstream fetches issued by the store.
    pub static ref UPSTREAM_FETCH_DURATION: &'static str = {
        metrics::describe_histogram!(
            "cellgate_upstream_fetch_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of upstream fetches in seconds."
        );
        "cellgate_upstream_fetch_duration_seconds"
    };
    /// Callers that joined an in-flight fetch instead of starting one.
    pub static ref SINGLE_FLIGHT_JOINED: &'static str = {
        metrics::describe_counter!(
            "cellgate_single_flight_joined_total",
            "Total number of callers that joined an in-flight fetch."
        );
        "cellgate_single_flight_joined_total"
    };
    /// Background refresh tasks spawned.
    pub static ref OFFLOAD_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "cellgate_offload_tasks_spawned_total",
            "Total number of background refresh tasks spawned."
        );
        "cellgate_offload_tasks_spawned_total"
    };
    /// Background refresh tasks skipped because one was already running.
    pub static ref OFFLOAD_TASKS_DEDUPLICATED: &'static str = {
        metrics::describe_counter!(
            "cellgate_offload_tasks_deduplicated_total",
            "Total number of background refresh tasks deduplicated."
        );
        "cellgate_offload_tasks_deduplicated_total"
    };
    /// Background refresh tasks that finished.
    pub static ref OFFLOAD_TASKS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "cellgate_offload_tasks_completed_total",
            "Total number of background refresh tasks completed."
        );
        "cellgate_offload_tasks_completed_total"
    };
    /// Background refresh tasks cancelled by timeout.
    pub static ref OFFLOAD_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "cellgate_offload_tasks_timeout_total",
            "Total number of background refresh tasks cancelled by timeout."
        );
        "cellgate_offload_tasks_timeout_total"
    };
    /// Duration of background refresh tasks.
    pub static ref OFFLOAD_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "cellgate_offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of background refresh tasks in seconds."
        );
        "cellgate_offload_task_duration_seconds"
    };
}
