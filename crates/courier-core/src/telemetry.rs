//! Operation telemetry.
//!
//! Reporters are injected into the engine and dispatchers at construction;
//! there is no process-wide telemetry client.

use std::fmt;
use std::time::Instant;

use tracing::{Span, debug, info_span, warn};

/// One in-flight operation, e.g. "send command".
#[derive(Debug)]
pub struct TelemetryOperation {
    /// Operation kind, e.g. `"Cqrs send command"`.
    pub kind: &'static str,
    /// Message type name.
    pub target: String,
    /// Context the operation belongs to.
    pub context: Option<String>,
    /// Additional data, e.g. the remote context.
    pub data: Option<String>,
    /// Monotonic start time.
    pub started_at: Instant,
    /// Cleared by [`TelemetryReporter::record_failure`].
    pub success: bool,
    span: Span,
}

impl TelemetryOperation {
    /// Starts an operation record.
    pub fn new(
        kind: &'static str,
        target: impl Into<String>,
        context: Option<&str>,
        data: Option<&str>,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            context: context.map(str::to_string),
            data: data.map(str::to_string),
            started_at: Instant::now(),
            success: true,
            span: Span::none(),
        }
    }

    /// Attaches a tracing span to the operation.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Span attached to this operation, `Span::none()` if unset.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Records operations and their failures.
pub trait TelemetryReporter: Send + Sync {
    /// Begins an operation.
    fn start_operation(
        &self,
        kind: &'static str,
        target: &str,
        context: Option<&str>,
        data: Option<&str>,
    ) -> TelemetryOperation {
        TelemetryOperation::new(kind, target, context, data)
    }

    /// Marks the operation as failed.
    fn record_failure(&self, operation: &mut TelemetryOperation, error: &dyn fmt::Display) {
        let _ = error;
        operation.success = false;
    }

    /// Completes the operation.
    fn finish_operation(&self, operation: TelemetryOperation) {
        let _ = operation;
    }
}

/// Reporter that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryReporter for NoopTelemetry {}

/// Reporter emitting spans and events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryReporter for TracingTelemetry {
    fn start_operation(
        &self,
        kind: &'static str,
        target: &str,
        context: Option<&str>,
        data: Option<&str>,
    ) -> TelemetryOperation {
        let span = info_span!(
            "telemetry",
            kind,
            message_type = target,
            context = context.unwrap_or("default"),
            data = data.unwrap_or("")
        );
        TelemetryOperation::new(kind, target, context, data).with_span(span)
    }

    fn record_failure(&self, operation: &mut TelemetryOperation, error: &dyn fmt::Display) {
        operation.success = false;
        warn!(parent: &operation.span, error = %error, "Operation failed");
    }

    fn finish_operation(&self, operation: TelemetryOperation) {
        let elapsed_ms = operation.started_at.elapsed().as_millis() as u64;
        debug!(
            parent: &operation.span,
            success = operation.success,
            elapsed_ms,
            "Operation finished"
        );
    }
}
