//! The per-node control plane handed to operator bodies.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::diagnostic::{Diagnostic, DiagnosticHandle, Severity};
use crate::element::EventBatch;
use crate::error::EngineError;

/// The object an operator body interacts with at runtime.
///
/// Routes diagnostics to the bus, carries the node's abort latch, and gives
/// read-only access to the process-wide schema catalog and configuration.
pub struct ExecCtrl {
    /// Rendered form of the operator, quoted in diagnostic notes.
    operator: String,
    diagnostics: DiagnosticHandle,
    catalog: Arc<Catalog>,
    config: Arc<EngineConfig>,
    abort: Option<EngineError>,
    seen_error: bool,
}

impl ExecCtrl {
    pub(crate) fn new(
        operator: String,
        diagnostics: DiagnosticHandle,
        catalog: Arc<Catalog>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            operator,
            diagnostics,
            catalog,
            config,
            abort: None,
            seen_error: false,
        }
    }

    /// Abort the pipeline with a fatal error.
    ///
    /// Routes the error as an `error` diagnostic (unless it is the silent
    /// sentinel) and latches this node for a failed exit. Aborting an already
    /// aborted node is a no-op: one diagnostic, one terminal transition.
    pub fn abort(&mut self, error: EngineError) {
        if self.abort.is_some() {
            return;
        }
        if !error.is_silent() {
            self.emit_diagnostic(
                Diagnostic::error(error.to_string())
                    .note(format!("from `{}`", self.operator))
                    .build(),
            );
        }
        // The diagnostic carries the message; the latch is the sentinel.
        self.abort = Some(EngineError::Silent);
    }

    /// Surface a recoverable notice; data flow continues.
    pub fn warn(&mut self, error: EngineError) {
        if !error.is_silent() {
            self.emit_diagnostic(
                Diagnostic::warning(error.to_string())
                    .note(format!("from `{}`", self.operator))
                    .build(),
            );
        }
    }

    /// Reserved for diagnostics-driven emission from sources.
    pub fn emit(&mut self, _events: EventBatch) {
        self.abort(EngineError::LogicError {
            message: format!("`{}` called the reserved emit operation", self.operator),
        });
    }

    /// Forward a prebuilt diagnostic to the bus.
    ///
    /// The first `error` severity also latches this node with the silent
    /// sentinel so it terminates without re-reporting.
    pub fn emit_diagnostic(&mut self, diagnostic: Diagnostic) {
        let is_error = diagnostic.severity == Severity::Error;
        self.diagnostics.emit(diagnostic);
        if is_error && !self.seen_error {
            self.seen_error = true;
            if self.abort.is_none() {
                self.abort = Some(EngineError::Silent);
            }
        }
    }

    /// Read-only access to the process-wide schema catalog.
    pub fn schemas(&self) -> &Catalog {
        &self.catalog
    }

    /// Read-only access to concept mappings. Alias of [`ExecCtrl::schemas`]
    /// for call sites that read concepts rather than schemas.
    pub fn concepts(&self) -> &Catalog {
        &self.catalog
    }

    /// Whether operators that refuse to run by default are allowed.
    pub fn allow_unsafe_pipelines(&self) -> bool {
        self.config.allow_unsafe_pipelines
    }

    /// Whether an error diagnostic has passed through this node.
    pub fn has_seen_error(&self) -> bool {
        self.seen_error
    }

    pub(crate) fn abort_reason(&self) -> Option<EngineError> {
        self.abort.clone()
    }
}
