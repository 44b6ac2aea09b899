//! Prometheus metrics for the billing engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Invoice counter by status.
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoices_total",
        "Total number of invoices by status",
        &["status"] // draft, sent, partially_paid, paid, cancelled
    )
    .expect("Failed to register invoices_total")
});

/// Payment counter by method and status.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payments_total",
        "Total number of payments by method and status",
        &["method", "status"]
    )
    .expect("Failed to register payments_total")
});

/// Dispute counter by status.
pub static DISPUTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_disputes_total",
        "Total number of disputes by status",
        &["status"]
    )
    .expect("Failed to register disputes_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Operation duration histogram.
pub static OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_operation_duration_seconds",
        "Billing operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_duration")
});

/// Invoice amount counter by currency.
pub static INVOICE_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoice_amount_total",
        "Total invoiced amount by currency",
        &["currency"]
    )
    .expect("Failed to register invoice_amount_total")
});

/// Payment amount counter by currency.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payment_amount_total",
        "Total settled payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&DISPUTES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&OP_DURATION);
    Lazy::force(&INVOICE_AMOUNT_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_text_includes_observed_families() {
        init_metrics();
        INVOICES_TOTAL.with_label_values(&["draft"]).inc();
        OP_DURATION.with_label_values(&["settle"]).observe(0.002);

        let text = get_metrics();
        assert!(text.contains("billing_invoices_total"));
        assert!(text.contains("billing_operation_duration_seconds"));
    }
}
