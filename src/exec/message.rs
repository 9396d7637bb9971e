//! The mailbox protocol between execution nodes.
//!
//! Nodes communicate only by asynchronous messages: `start`, `pull`, `push`,
//! and lifecycle notifications. A [`NodeHandle`] is the address of a node;
//! it does not keep the node alive, and sending to a terminated node fails
//! with a receiver-down error that callers handle silently during shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::element::Elements;
use crate::error::EngineError;

/// Why a node terminated.
#[derive(Debug, Clone)]
pub enum ExitReason {
    /// Clean end-of-stream or external shutdown.
    Normal,
    /// The node failed; a silent error means the cause was already reported
    /// as a diagnostic.
    Failed(EngineError),
}

impl ExitReason {
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

/// A message in a node's mailbox.
///
/// The first group is the inter-node protocol; the second group carries
/// completions and notifications that the node forwarded to itself so that
/// all per-node state changes happen on its own worker.
pub(crate) enum NodeMsg {
    /// Initialize the node. Non-sources pop their upstream off `previous`
    /// and forward the rest, so initialization propagates tail-to-head.
    Start {
        previous: Vec<NodeHandle>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Demand from downstream: deliver up to `batch_size` elements to
    /// `sink`, by `batch_timeout` at the latest.
    Pull {
        sink: NodeHandle,
        batch_size: u64,
        batch_timeout: Duration,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Delivery of elements in response to a pull.
    Push {
        elements: Elements,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Register a listener that fires with this node's exit reason.
    Monitor {
        listener: oneshot::Sender<ExitReason>,
    },
    /// Abort request from the diagnostic bus; latches the node silently.
    Abort,
    /// External exit; terminates the node regardless of buffer state.
    Exit { reason: ExitReason },

    /// A scheduled turn of the run loop.
    Run,
    /// The upstream answered (or failed) our pull request.
    PullResponded(Result<(), EngineError>),
    /// The downstream acknowledged (or failed) a non-blocking push.
    PushAcked(Result<(), EngineError>),
    /// The monitored upstream node terminated.
    UpstreamDown(ExitReason),
    /// A pending demand reached its deadline.
    DemandTimeout,
}

/// The address of an execution node.
#[derive(Clone)]
pub struct NodeHandle {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<NodeMsg>,
}

impl NodeHandle {
    pub(crate) fn new(name: Arc<str>, tx: mpsc::UnboundedSender<NodeMsg>) -> Self {
        Self { name, tx }
    }

    /// The operator name this node hosts.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, msg: NodeMsg) -> Result<(), EngineError> {
        self.tx.send(msg).map_err(|_| EngineError::ReceiverDown)
    }

    /// Start the node, handing it the chain of its predecessors.
    pub(crate) async fn start(&self, previous: Vec<NodeHandle>) -> Result<(), EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(NodeMsg::Start { previous, reply })?;
        response.await.map_err(|_| EngineError::ReceiverDown)?
    }

    /// Issue a pull request. The returned channel resolves when the demand
    /// has been satisfied (or rejected).
    pub(crate) fn send_pull(
        &self,
        sink: NodeHandle,
        batch_size: u64,
        batch_timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<(), EngineError>>, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(NodeMsg::Pull {
            sink,
            batch_size,
            batch_timeout,
            reply,
        })?;
        Ok(response)
    }

    /// Deliver elements. The returned channel resolves with the receiving
    /// node's acknowledgement.
    pub(crate) fn send_push(
        &self,
        elements: Elements,
    ) -> Result<oneshot::Receiver<Result<(), EngineError>>, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(NodeMsg::Push { elements, reply })?;
        Ok(response)
    }

    /// Register for the node's exit reason. If the node is already gone, the
    /// returned channel resolves with an error immediately.
    pub(crate) fn monitor(&self) -> oneshot::Receiver<ExitReason> {
        let (listener, receiver) = oneshot::channel();
        let _ = self.send(NodeMsg::Monitor { listener });
        receiver
    }

    /// Ask the node to abort; used by the diagnostic bus.
    pub(crate) fn abort(&self) {
        let _ = self.send(NodeMsg::Abort);
    }

    /// Terminate the node regardless of buffer state.
    pub(crate) fn exit(&self, reason: ExitReason) {
        let _ = self.send(NodeMsg::Exit { reason });
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("name", &self.name).finish()
    }
}
