//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Total messages handed to a processor
    pub static ref MESSAGE_PROCESS_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_process_total",
        "Total messages handed to the module processor",
        &["delivery", "status"]
    )
    .unwrap();

    /// Message processing duration
    pub static ref MESSAGE_PROCESS_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_process_duration_seconds",
        "Message processing duration in seconds",
        &["delivery"]
    )
    .unwrap();

    /// Processor lookups
    pub static ref PROCESSOR_LOOKUP_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_processor_lookup_total",
        "Module processor lookups (found/unavailable)",
        &["status"]
    )
    .unwrap();
}
