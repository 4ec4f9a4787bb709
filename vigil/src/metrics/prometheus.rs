//! Prometheus metrics exporter.
//!
//! Exports metrics in Prometheus text format. The HTTP layer that serves
//! `/metrics` lives outside this crate and simply returns `export()`.

use std::sync::Arc;

use super::collector::MetricsCollector;

/// Prometheus metrics exporter.
pub struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
    namespace: String,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter.
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self {
            collector,
            namespace: "vigil".to_string(),
        }
    }

    /// Create a new Prometheus exporter with custom namespace.
    pub fn with_namespace(collector: Arc<MetricsCollector>, namespace: impl Into<String>) -> Self {
        Self {
            collector,
            namespace: namespace.into(),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let snapshot = self.collector.snapshot();
        let mut output = String::new();

        // Notification outcomes
        for (id, service_id, kind, count) in &snapshot.notify_success {
            self.write_counter_with_labels(
                &mut output,
                "notify_success_total",
                "Total successful notification dispatches",
                *count as f64,
                &[("id", id), ("service_id", service_id), ("type", kind)],
            );
        }
        for (id, service_id, kind, count) in &snapshot.notify_fail {
            self.write_counter_with_labels(
                &mut output,
                "notify_fail_total",
                "Total failed notification dispatches",
                *count as f64,
                &[("id", id), ("service_id", service_id), ("type", kind)],
            );
        }

        // Command outcomes
        for (id, service_id, count) in &snapshot.command_success {
            self.write_counter_with_labels(
                &mut output,
                "command_success_total",
                "Total successful command runs",
                *count as f64,
                &[("id", id), ("service_id", service_id)],
            );
        }
        for (id, service_id, count) in &snapshot.command_fail {
            self.write_counter_with_labels(
                &mut output,
                "command_fail_total",
                "Total failed command runs",
                *count as f64,
                &[("id", id), ("service_id", service_id)],
            );
        }

        // Webhook outcomes
        for (id, service_id, count) in &snapshot.webhook_success {
            self.write_counter_with_labels(
                &mut output,
                "webhook_success_total",
                "Total successful webhook deliveries",
                *count as f64,
                &[("id", id), ("service_id", service_id)],
            );
        }
        for (id, service_id, count) in &snapshot.webhook_fail {
            self.write_counter_with_labels(
                &mut output,
                "webhook_fail_total",
                "Total failed webhook deliveries",
                *count as f64,
                &[("id", id), ("service_id", service_id)],
            );
        }

        // Version-state gauges
        let mut services: Vec<_> = snapshot.update_available.iter().collect();
        services.sort();
        for (service_id, available) in services {
            self.write_gauge_with_labels(
                &mut output,
                "update_available",
                "Whether the latest version differs from the deployed one",
                *available as f64,
                &[("service_id", service_id)],
            );
        }

        let mut classes: Vec<_> = snapshot.updates_current.iter().collect();
        classes.sort();
        for (class, count) in classes {
            self.write_gauge_with_labels(
                &mut output,
                "updates_current",
                "Number of services with a pending update by classification",
                *count as f64,
                &[("classification", class)],
            );
        }

        output
    }

    fn write_gauge_with_labels(
        &self,
        output: &mut String,
        name: &str,
        help: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) {
        let full_name = format!("{}_{}", self.namespace, name);
        output.push_str(&format!("# HELP {} {}\n", full_name, help));
        output.push_str(&format!("# TYPE {} gauge\n", full_name));
        output.push_str(&format!("{}{} {}\n", full_name, Self::label_str(labels), value));
    }

    fn write_counter_with_labels(
        &self,
        output: &mut String,
        name: &str,
        help: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) {
        let full_name = format!("{}_{}", self.namespace, name);
        output.push_str(&format!("# HELP {} {}\n", full_name, help));
        output.push_str(&format!("# TYPE {} counter\n", full_name));
        output.push_str(&format!("{}{} {}\n", full_name, Self::label_str(labels), value));
    }

    fn label_str(labels: &[(&str, &str)]) -> String {
        if labels.is_empty() {
            return String::new();
        }
        let rendered: Vec<String> = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect();
        format!("{{{}}}", rendered.join(","))
    }
}
