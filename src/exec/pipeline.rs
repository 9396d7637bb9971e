//! Pipeline construction and execution.
//!
//! The builder type-checks the operator chain left to right, spawns one
//! execution node per operator, and hands the predecessor chain to the
//! sink's `start` so initialization propagates tail-to-head. The executor
//! then awaits every node's exit and folds the exit reasons and collected
//! diagnostics into a single result.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::diagnostic::DiagnosticBus;
use crate::element::ElementType;
use crate::emit;
use crate::error::EngineError;
use crate::metrics::events::PipelineCompleted;
use crate::operator::{EventOrder, Location, Operator, Optimized};

use super::message::{ExitReason, NodeHandle};
use super::spawn::{spawn_exec_node, NodeCtx};

/// Runs operator chains to completion.
pub struct Executor {
    catalog: Arc<Catalog>,
    config: Arc<EngineConfig>,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(
        catalog: Arc<Catalog>,
        config: Arc<EngineConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            config,
            shutdown,
        }
    }

    /// Run a pipeline to completion.
    ///
    /// Fails with the first error diagnostic if the pipeline aborted, with
    /// the builder error if construction failed, and succeeds on clean
    /// end-of-stream or external shutdown.
    pub async fn run(&self, operators: Vec<Box<dyn Operator>>) -> Result<(), EngineError> {
        let bus = DiagnosticBus::spawn();
        let outcome = self.run_with_bus(operators, &bus).await;
        // The bus drains only after every node dropped its handle, so the
        // first error is authoritative here.
        let diagnostics = bus.finish().await;
        let first_error = diagnostics
            .iter()
            .find(|d| d.severity == crate::diagnostic::Severity::Error);
        let result = match outcome {
            // Instantiation and runtime errors surface as diagnostics and
            // take precedence over propagated failures.
            Err(error) => match first_error {
                Some(diagnostic) => Err(diagnostic.to_error()),
                None if error.is_silent() => Err(EngineError::Unspecified {
                    message: "pipeline aborted without a diagnostic".to_string(),
                }),
                None => Err(error),
            },
            Ok(()) => match first_error {
                Some(diagnostic) => Err(diagnostic.to_error()),
                None => Ok(()),
            },
        };
        emit!(PipelineCompleted {
            success: result.is_ok(),
        });
        result
    }

    /// Run a pipeline against a caller-provided diagnostic bus.
    ///
    /// Returns the raw outcome; a `silent` error means the cause was
    /// reported to the bus.
    pub async fn run_with_bus(
        &self,
        operators: Vec<Box<dyn Operator>>,
        bus: &DiagnosticBus,
    ) -> Result<(), EngineError> {
        let operators = optimize_chain(operators);
        if operators.is_empty() {
            return Err(EngineError::InvalidConfiguration {
                message: "pipeline is empty".to_string(),
            });
        }
        // The child token lets the executor kill its nodes without
        // cancelling the caller's token; external shutdown propagates down.
        let kill = self.shutdown.child_token();
        let ctx = NodeCtx {
            diagnostics: bus.handle(),
            catalog: Arc::clone(&self.catalog),
            config: Arc::clone(&self.config),
            kill: kill.clone(),
        };
        let mut handles: Vec<NodeHandle> = Vec::with_capacity(operators.len());
        let mut input_type = ElementType::None;
        for op in operators {
            if op.location() == Location::Remote {
                kill.cancel();
                return Err(EngineError::InvalidConfiguration {
                    message: format!("`{op}` must run at a node, but none is available"),
                });
            }
            let (handle, output_type) = match spawn_exec_node(op, input_type, &ctx) {
                Ok(spawned) => spawned,
                Err(error) => {
                    kill.cancel();
                    return Err(error);
                }
            };
            bus.register(handle.clone());
            handles.push(handle);
            input_type = output_type;
        }
        if input_type != ElementType::None {
            kill.cancel();
            return Err(EngineError::TypeMismatch {
                message: format!("pipeline ends in `{input_type}` instead of a sink"),
            });
        }
        // Monitor every node before anything can terminate.
        let exits: Vec<_> = handles.iter().map(NodeHandle::monitor).collect();
        let Some((sink, previous)) = handles.split_last() else {
            return Ok(());
        };
        debug!("starting pipeline of {} nodes", handles.len());
        if let Err(error) = sink.start(previous.to_vec()).await {
            kill.cancel();
            let _ = join_all(exits).await;
            return Err(error);
        }
        info!("pipeline started with {} operators", handles.len());
        let results = join_all(exits).await;
        let mut silent_failure = false;
        let mut failure: Option<EngineError> = None;
        for result in results {
            match result {
                Ok(ExitReason::Normal) => {}
                Ok(ExitReason::Failed(error)) if error.is_silent() => {
                    silent_failure = true;
                }
                Ok(ExitReason::Failed(error)) => {
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
                // The node vanished without a reason; shutdown progress.
                Err(_) => {}
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }
        if silent_failure {
            return Err(EngineError::Silent);
        }
        info!("pipeline completed");
        Ok(())
    }
}

/// Ask each operator to optimize itself, dropping elided no-ops.
///
/// Walks sink to source so order requirements propagate upstream.
fn optimize_chain(operators: Vec<Box<dyn Operator>>) -> Vec<Box<dyn Operator>> {
    let mut order = EventOrder::Ordered;
    let mut kept: Vec<Box<dyn Operator>> = Vec::with_capacity(operators.len());
    for op in operators.into_iter().rev() {
        match op.optimize(order) {
            Optimized::Unchanged { order: upstream_order } => {
                order = upstream_order;
                kept.push(op);
            }
            Optimized::Elided => {
                debug!("optimized away no-op operator `{op}`");
            }
        }
    }
    kept.reverse();
    kept
}
