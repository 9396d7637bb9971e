//! Spawning monomorphized execution nodes.
//!
//! The engine specializes each node on its `(input, output)` element-type
//! combination. This module performs the dispatch from runtime element types
//! to the monomorphized node bodies and places detached operators on
//! dedicated workers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::diagnostic::DiagnosticHandle;
use crate::element::{Chunk, Element, ElementType, EventBatch, Nil};
use crate::error::EngineError;
use crate::operator::{ExecCtrl, FromInstance, Operator, Sequence};

use super::message::NodeHandle;
use super::node::ExecNode;

/// Shared construction context for all nodes of one pipeline.
#[derive(Clone)]
pub(crate) struct NodeCtx {
    pub diagnostics: DiagnosticHandle,
    pub catalog: Arc<Catalog>,
    pub config: Arc<EngineConfig>,
    pub kill: CancellationToken,
}

/// Infer the operator's output type and spawn its execution node.
///
/// Returns the node's handle together with the inferred output type, which
/// becomes the input type of the next operator in the chain.
pub(crate) fn spawn_exec_node(
    op: Box<dyn Operator>,
    input_type: ElementType,
    ctx: &NodeCtx,
) -> Result<(NodeHandle, ElementType), EngineError> {
    let output_type = op
        .infer_output(input_type)
        .map_err(|error| EngineError::TypeMismatch {
            message: format!("failed to spawn execution node for `{op}`: {error}"),
        })?;
    use ElementType::{Bytes, Events, None as NoneType};
    let handle = match (input_type, output_type) {
        (NoneType, NoneType) => {
            return Err(EngineError::LogicError {
                message: format!("`{op}` maps void to void and cannot be executed"),
            });
        }
        (NoneType, Events) => spawn_typed::<Nil, EventBatch>(op, ctx),
        (NoneType, Bytes) => spawn_typed::<Nil, Chunk>(op, ctx),
        (Events, Events) => spawn_typed::<EventBatch, EventBatch>(op, ctx),
        (Events, Bytes) => spawn_typed::<EventBatch, Chunk>(op, ctx),
        (Events, NoneType) => spawn_typed::<EventBatch, Nil>(op, ctx),
        (Bytes, Events) => spawn_typed::<Chunk, EventBatch>(op, ctx),
        (Bytes, Bytes) => spawn_typed::<Chunk, Chunk>(op, ctx),
        (Bytes, NoneType) => spawn_typed::<Chunk, Nil>(op, ctx),
    }?;
    Ok((handle, output_type))
}

fn spawn_typed<In, Out>(op: Box<dyn Operator>, ctx: &NodeCtx) -> Result<NodeHandle, EngineError>
where
    In: Element,
    Out: Element,
    Box<dyn Sequence<In, Out>>: FromInstance,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let name: Arc<str> = op.name().into();
    let handle = NodeHandle::new(Arc::clone(&name), tx.clone());
    let ctrl = ExecCtrl::new(
        op.to_string(),
        ctx.diagnostics.clone(),
        Arc::clone(&ctx.catalog),
        Arc::clone(&ctx.config),
    );
    let detached = op.detached();
    let node = ExecNode::<In, Out>::new(op, ctrl, ctx.kill.clone(), tx);
    if detached {
        // A detached operator gets a dedicated OS thread with its own
        // single-threaded runtime; the mailbox works across workers.
        let worker_name = Arc::clone(&name);
        std::thread::Builder::new()
            .name(format!("squall-node-{name}"))
            .spawn(move || match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(node.run_actor(rx)),
                Err(e) => error!("failed to build runtime for detached node {worker_name}: {e}"),
            })
            .map_err(|e| EngineError::Unspecified {
                message: format!("failed to spawn dedicated worker for `{name}`: {e}"),
            })?;
    } else {
        tokio::spawn(node.run_actor(rx));
    }
    Ok(handle)
}
