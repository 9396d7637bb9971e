//! The diagnostic bus.
//!
//! Every execution node routes operator warnings and errors here. The bus
//! stores each record, latches on the first error, and fans an abort signal
//! out to every registered node so the whole pipeline converges to failure
//! promptly. Delivery is reliable but not ordered across nodes.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::emit;
use crate::error::EngineError;
use crate::exec::NodeHandle;
use crate::metrics::events::{DiagnosticEmitted, DiagnosticSeverity};

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A recoverable notice; data flow continues.
    Warning,
    /// A fatal condition; the first one aborts the pipeline.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A diagnostic record emitted by an operator or the engine.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Start building an error diagnostic.
    pub fn error(message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder {
            inner: Diagnostic {
                severity: Severity::Error,
                message: message.into(),
                notes: Vec::new(),
            },
        }
    }

    /// Start building a warning diagnostic.
    pub fn warning(message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder {
            inner: Diagnostic {
                severity: Severity::Warning,
                message: message.into(),
                notes: Vec::new(),
            },
        }
    }

    /// Render this diagnostic as an engine error for a process exit reason.
    pub fn to_error(&self) -> EngineError {
        EngineError::Unspecified {
            message: self.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for note in &self.notes {
            write!(f, " ({note})")?;
        }
        Ok(())
    }
}

/// Builder for [`Diagnostic`] records.
pub struct DiagnosticBuilder {
    inner: Diagnostic,
}

impl DiagnosticBuilder {
    /// Attach a note providing context.
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.inner.notes.push(note.into());
        self
    }

    /// Send the finished diagnostic to the bus.
    pub fn emit(self, handle: &DiagnosticHandle) {
        handle.emit(self.inner);
    }

    /// Finish building without emitting.
    pub fn build(self) -> Diagnostic {
        self.inner
    }
}

enum BusMsg {
    Emit(Diagnostic),
    Register(NodeHandle),
}

/// A cloneable sender for routing diagnostics to the bus.
#[derive(Clone)]
pub struct DiagnosticHandle {
    tx: mpsc::UnboundedSender<BusMsg>,
}

impl DiagnosticHandle {
    /// Deliver a diagnostic. Delivery failures are ignored; the bus only
    /// goes away after every node has terminated.
    pub fn emit(&self, diagnostic: Diagnostic) {
        let _ = self.tx.send(BusMsg::Emit(diagnostic));
    }
}

/// The diagnostic bus: a single receiver with internally serialized delivery.
pub struct DiagnosticBus {
    handle: DiagnosticHandle,
    collected: Arc<Mutex<Vec<Diagnostic>>>,
    task: JoinHandle<()>,
}

impl DiagnosticBus {
    /// Spawn the bus task.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(run_bus(rx, Arc::clone(&collected)));
        Self {
            handle: DiagnosticHandle { tx },
            collected,
            task,
        }
    }

    /// A sender for nodes to route diagnostics through.
    pub fn handle(&self) -> DiagnosticHandle {
        self.handle.clone()
    }

    /// Make the bus aware of a node so it can be aborted on the first error.
    pub fn register(&self, node: NodeHandle) {
        let _ = self.handle.tx.send(BusMsg::Register(node));
    }

    /// Snapshot of all diagnostics received so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.collected.lock().expect("diagnostic store poisoned").clone()
    }

    /// The first error diagnostic, if any error has been seen.
    pub fn first_error(&self) -> Option<Diagnostic> {
        self.diagnostics()
            .into_iter()
            .find(|d| d.severity == Severity::Error)
    }

    /// Drop the bus side of the channel and wait for the task to drain.
    ///
    /// Node-held handles keep the channel open until their nodes terminate.
    pub async fn finish(self) -> Vec<Diagnostic> {
        drop(self.handle);
        let _ = self.task.await;
        self.collected
            .lock()
            .expect("diagnostic store poisoned")
            .clone()
    }
}

async fn run_bus(mut rx: mpsc::UnboundedReceiver<BusMsg>, collected: Arc<Mutex<Vec<Diagnostic>>>) {
    let mut nodes: Vec<NodeHandle> = Vec::new();
    let mut seen_error = false;
    while let Some(msg) = rx.recv().await {
        match msg {
            BusMsg::Emit(diagnostic) => {
                match diagnostic.severity {
                    Severity::Warning => {
                        warn!("{diagnostic}");
                        emit!(DiagnosticEmitted {
                            severity: DiagnosticSeverity::Warning
                        });
                    }
                    Severity::Error => {
                        error!("{diagnostic}");
                        emit!(DiagnosticEmitted {
                            severity: DiagnosticSeverity::Error
                        });
                    }
                }
                let is_error = diagnostic.severity == Severity::Error;
                collected
                    .lock()
                    .expect("diagnostic store poisoned")
                    .push(diagnostic);
                if is_error && !seen_error {
                    seen_error = true;
                    debug!("first error diagnostic; aborting {} nodes", nodes.len());
                    for node in &nodes {
                        node.abort();
                    }
                }
            }
            BusMsg::Register(node) => {
                if seen_error {
                    // Late registration after failure: converge immediately.
                    node.abort();
                }
                nodes.push(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_notes() {
        let diagnostic = Diagnostic::error("parse failed")
            .note("from `slice`")
            .note("while reading arguments")
            .build();
        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(
            diagnostic.to_string(),
            "parse failed (from `slice`) (while reading arguments)"
        );
    }

    #[tokio::test]
    async fn test_bus_collects_in_order_per_sender() {
        let bus = DiagnosticBus::spawn();
        let handle = bus.handle();
        Diagnostic::warning("one").emit(&handle);
        Diagnostic::error("two").emit(&handle);
        drop(handle);
        let diagnostics = bus.finish().await;
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "one");
        assert_eq!(diagnostics[1].message, "two");
    }

    #[tokio::test]
    async fn test_first_error_latch() {
        let bus = DiagnosticBus::spawn();
        let handle = bus.handle();
        Diagnostic::warning("noise").emit(&handle);
        Diagnostic::error("boom").emit(&handle);
        Diagnostic::error("aftershock").emit(&handle);
        drop(handle);
        // Wait for the bus task to drain its queue.
        while bus.diagnostics().len() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.first_error().map(|d| d.message), Some("boom".into()));
    }
}
