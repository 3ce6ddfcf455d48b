//! Adapter metrics

use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec,
    HistogramVec, IntGaugeVec,
};

lazy_static::lazy_static! {
    pub static ref MANAGED_CONNECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "adapter_managed_connections_total",
        "Managed connection lifecycle transitions",
        &["event"]
    )
    .unwrap();

    pub static ref MANAGED_CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        "adapter_managed_connections_active",
        "Managed connections in the factory index",
        &["adapter_type"]
    )
    .unwrap();

    pub static ref CONNECTION_HANDLES_TOTAL: CounterVec = register_counter_vec!(
        "adapter_connection_handles_total",
        "Connection handles issued and closed",
        &["event"]
    )
    .unwrap();

    pub static ref INTERACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "adapter_interactions_total",
        "Interactions by function and outcome",
        &["function", "outcome"]
    )
    .unwrap();

    pub static ref INTERACTION_DURATION: HistogramVec = register_histogram_vec!(
        "adapter_interaction_duration_seconds",
        "Interaction duration",
        &["function"]
    )
    .unwrap();

    pub static ref INBOUND_ITEMS_TOTAL: CounterVec = register_counter_vec!(
        "adapter_inbound_items_total",
        "Inbound work items by result",
        &["result"]
    )
    .unwrap();

    pub static ref POLL_CYCLE_DURATION: HistogramVec = register_histogram_vec!(
        "adapter_poll_cycle_duration_seconds",
        "Duration of one inbound poll cycle",
        &["adapter_type"]
    )
    .unwrap();
}
