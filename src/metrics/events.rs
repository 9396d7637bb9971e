//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the engine.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus counter metric. Metrics carry an `operator` label so that
//! multi-operator pipelines stay observable per stage.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a node consumes elements from upstream.
pub struct ElementsConsumed {
    pub count: u64,
    /// Operator label identifying the pipeline stage.
    pub operator: String,
}

impl InternalEvent for ElementsConsumed {
    fn emit(self) {
        trace!(count = self.count, operator = %self.operator, "Elements consumed");
        counter!("squall_elements_consumed_total", "operator" => self.operator).increment(self.count);
    }
}

/// Event emitted when a node delivers elements downstream.
pub struct ElementsDelivered {
    pub count: u64,
    /// Operator label identifying the pipeline stage.
    pub operator: String,
}

impl InternalEvent for ElementsDelivered {
    fn emit(self) {
        trace!(count = self.count, operator = %self.operator, "Elements delivered");
        counter!("squall_elements_delivered_total", "operator" => self.operator).increment(self.count);
    }
}

/// Event emitted when a batch crosses a node boundary.
pub struct BatchesDelivered {
    pub count: u64,
    /// Operator label identifying the pipeline stage.
    pub operator: String,
}

impl InternalEvent for BatchesDelivered {
    fn emit(self) {
        trace!(count = self.count, operator = %self.operator, "Batches delivered");
        counter!("squall_batches_delivered_total", "operator" => self.operator).increment(self.count);
    }
}

/// Severity label for diagnostic metrics.
#[derive(Debug, Clone, Copy)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

impl DiagnosticSeverity {
    fn as_str(&self) -> &'static str {
        match self {
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Error => "error",
        }
    }
}

/// Event emitted when a diagnostic reaches the bus.
pub struct DiagnosticEmitted {
    pub severity: DiagnosticSeverity,
}

impl InternalEvent for DiagnosticEmitted {
    fn emit(self) {
        trace!(severity = self.severity.as_str(), "Diagnostic emitted");
        counter!("squall_diagnostics_total", "severity" => self.severity.as_str()).increment(1);
    }
}

/// Event emitted when a pipeline run finishes.
pub struct PipelineCompleted {
    pub success: bool,
}

impl InternalEvent for PipelineCompleted {
    fn emit(self) {
        let status = if self.success { "success" } else { "failure" };
        trace!(status, "Pipeline completed");
        counter!("squall_pipelines_completed_total", "status" => status).increment(1);
    }
}
