use std::sync::Arc;

use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

use pod_storage::{MetricsCollector, SharedMetrics};

lazy_static! {
    static ref OBJECT_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "pod_object_operations_total",
        "Object store operations by kind",
        &["operation"]
    )
    .unwrap();
    static ref BYTES_TRANSFERRED: IntCounterVec = register_int_counter_vec!(
        "pod_bytes_total",
        "Bytes moved to and from the object store",
        &["direction"]
    )
    .unwrap();
    static ref BACKEND_ERRORS: IntCounter = register_int_counter!(
        "pod_backend_errors_total",
        "Object store failures other than missing keys"
    )
    .unwrap();
}

/// [`MetricsCollector`] recording into the default prometheus registry.
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    pub fn shared() -> SharedMetrics {
        SharedMetrics::new(Arc::new(Self))
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn object_read(&self) {
        OBJECT_OPERATIONS.with_label_values(&["read"]).inc();
    }

    fn object_written(&self) {
        OBJECT_OPERATIONS.with_label_values(&["write"]).inc();
    }

    fn object_deleted(&self) {
        OBJECT_OPERATIONS.with_label_values(&["delete"]).inc();
    }

    fn backend_error(&self) {
        BACKEND_ERRORS.inc();
    }

    fn bytes_sent(&self, amount: usize) {
        BYTES_TRANSFERRED
            .with_label_values(&["sent"])
            .inc_by(amount as u64);
    }

    fn bytes_received(&self, amount: usize) {
        BYTES_TRANSFERRED
            .with_label_values(&["received"])
            .inc_by(amount as u64);
    }
}

/// Every registered metric in the prometheus text format.
pub fn gather() -> Result<String> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
