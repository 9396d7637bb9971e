//! The execution node: the scheduled unit wrapping one operator.
//!
//! Each node owns a single logical worker with one mailbox. Within that
//! worker the operator body, the inbound/outbound buffers, the pending
//! demand, and the metrics are accessed sequentially, so no locking is
//! needed for per-node state. Data flows downstream through `push`, control
//! flows upstream through `pull`, and diagnostics flow sideways to the bus.
//!
//! Completions (pull responses, push acknowledgements, upstream exits,
//! demand deadlines) are forwarded into the node's own mailbox so that every
//! state change happens on the node's worker.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{KI, MI};
use crate::diagnostic::Diagnostic;
use crate::element::{split, total_size, Element, ElementType, Elements};
use crate::emit;
use crate::error::EngineError;
use crate::metrics::events::{BatchesDelivered, ElementsConsumed, ElementsDelivered};
use crate::operator::{ExecCtrl, FromInstance, Input, Operator, Sequence, Step};

use super::message::{ExitReason, NodeHandle, NodeMsg};

/// Upper bound for the batch timeout used when requesting a batch from the
/// previous execution node.
pub const MAX_BATCH_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound for how often an operator's sequence may be advanced within
/// one run before yielding back to the scheduler. Values above 1 break
/// request/await for operators that suspend on a control-plane request.
pub const MAX_ADVANCES_PER_RUN: usize = 1;

/// Per-element-type buffer sizing.
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    /// Upper bound for the batch size used when requesting a batch from the
    /// previous execution node.
    pub max_batch_size: u64,
    /// How much free capacity must be in the inbound buffer before the node
    /// requests further data.
    pub min_batch_size: u64,
    /// Upper bound for the inbound and outbound buffers.
    pub max_buffered: u64,
}

/// The buffer sizing for a given element type, in rows or bytes.
pub const fn buffer_limits(element_type: ElementType) -> BufferLimits {
    match element_type {
        ElementType::Events => BufferLimits {
            max_batch_size: 64 * KI,
            min_batch_size: 8 * KI,
            max_buffered: 254 * KI,
        },
        ElementType::Bytes => BufferLimits {
            max_batch_size: MI,
            min_batch_size: 128 * KI,
            max_buffered: 4 * MI,
        },
        ElementType::None => BufferLimits {
            max_batch_size: 0,
            min_batch_size: 0,
            max_buffered: 0,
        },
    }
}

fn limits<T: Element>() -> BufferLimits {
    buffer_limits(T::TYPE)
}

/// The currently open demand from downstream.
struct Demand {
    reply: tokio::sync::oneshot::Sender<Result<(), EngineError>>,
    sink: NodeHandle,
    batch_size: u64,
    deadline: Instant,
    ongoing: bool,
}

/// Timing and throughput counters for one node.
struct NodeMetrics {
    started_at: Instant,
    time_starting: Duration,
    time_running: Duration,
    time_scheduled: Duration,
    inbound_total: u64,
    inbound_batches: u64,
    outbound_total: u64,
    outbound_batches: u64,
}

impl NodeMetrics {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            time_starting: Duration::ZERO,
            time_running: Duration::ZERO,
            time_scheduled: Duration::ZERO,
            inbound_total: 0,
            inbound_batches: 0,
            outbound_total: 0,
            outbound_batches: 0,
        }
    }
}

/// Runtime state for exactly one operator instance.
pub(crate) struct ExecNode<In: Element, Out: Element> {
    op: Box<dyn Operator>,
    name: Arc<str>,
    ctrl: ExecCtrl,
    kill: CancellationToken,
    self_tx: mpsc::UnboundedSender<NodeMsg>,

    /// The instantiated output sequence. Created at most once, by `start`.
    instance: Option<Box<dyn Sequence<In, Out>>>,
    /// The sequence reached its end.
    done: bool,
    /// The operator made no progress on its last advance; do not reschedule
    /// until new input or demand arrives.
    stalled: bool,
    run_scheduled: bool,

    upstream: Option<NodeHandle>,
    signaled_demand: bool,
    inbound: VecDeque<In>,
    inbound_buffered: u64,

    outbound: Vec<Out>,
    outbound_buffered: u64,
    demand: Option<Demand>,
    reject_demand: bool,
    /// Size of a non-blocking delivery awaiting its acknowledgement.
    push_in_flight: Option<u64>,

    monitors: Vec<tokio::sync::oneshot::Sender<ExitReason>>,
    metrics: NodeMetrics,
}

impl<In, Out> ExecNode<In, Out>
where
    In: Element,
    Out: Element,
    Box<dyn Sequence<In, Out>>: FromInstance,
{
    pub(crate) fn new(
        op: Box<dyn Operator>,
        ctrl: ExecCtrl,
        kill: CancellationToken,
        self_tx: mpsc::UnboundedSender<NodeMsg>,
    ) -> Self {
        let name: Arc<str> = op.name().into();
        Self {
            op,
            name,
            ctrl,
            kill,
            self_tx,
            instance: None,
            done: false,
            stalled: false,
            run_scheduled: false,
            upstream: None,
            signaled_demand: false,
            inbound: VecDeque::new(),
            inbound_buffered: 0,
            outbound: Vec::new(),
            outbound_buffered: 0,
            demand: None,
            reject_demand: false,
            push_in_flight: None,
            monitors: Vec::new(),
            metrics: NodeMetrics::new(),
        }
    }

    /// Drive the mailbox until the node terminates.
    pub(crate) async fn run_actor(mut self, mut rx: mpsc::UnboundedReceiver<NodeMsg>) {
        let kill = self.kill.clone();
        let reason = loop {
            let msg = tokio::select! {
                biased;
                _ = kill.cancelled() => break ExitReason::Normal,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break ExitReason::Normal,
                },
            };
            if let Some(reason) = self.handle(msg).await {
                break reason;
            }
        };
        self.terminate(reason);
    }

    async fn handle(&mut self, msg: NodeMsg) -> Option<ExitReason> {
        let scheduled = Instant::now();
        let outcome = match msg {
            NodeMsg::Start { previous, reply } => {
                let result = self.start(previous).await;
                let _ = reply.send(result);
                None
            }
            NodeMsg::Pull {
                sink,
                batch_size,
                batch_timeout,
                reply,
            } => {
                self.pull(sink, batch_size, batch_timeout, reply);
                None
            }
            NodeMsg::Push { elements, reply } => {
                let _ = reply.send(self.push(elements));
                None
            }
            NodeMsg::Monitor { listener } => {
                self.monitors.push(listener);
                None
            }
            NodeMsg::Abort => {
                self.ctrl.abort(EngineError::Silent);
                self.schedule_run();
                None
            }
            NodeMsg::Exit { reason } => Some(reason),
            NodeMsg::Run => {
                self.run_scheduled = false;
                self.run().await
            }
            NodeMsg::PullResponded(result) => {
                self.on_pull_response(result);
                None
            }
            NodeMsg::PushAcked(result) => {
                self.on_push_acked(result);
                None
            }
            NodeMsg::UpstreamDown(reason) => {
                self.on_upstream_down(reason);
                None
            }
            NodeMsg::DemandTimeout => {
                self.schedule_run();
                None
            }
        };
        self.metrics.time_scheduled += scheduled.elapsed();
        outcome
    }

    // ==== startup ====

    async fn start(&mut self, mut previous: Vec<NodeHandle>) -> Result<(), EngineError> {
        debug!("{} received start request", self.name);
        let starting = Instant::now();
        if self.instance.is_some() {
            return Err(EngineError::LogicError {
                message: format!("`{}` was already started", self.name),
            });
        }
        if In::TYPE == ElementType::None {
            if !previous.is_empty() {
                return Err(EngineError::LogicError {
                    message: format!(
                        "`{}` runs a source operator and must not have a previous execution node",
                        self.name
                    ),
                });
            }
        } else {
            let Some(upstream) = previous.pop() else {
                return Err(EngineError::LogicError {
                    message: format!(
                        "`{}` runs a transformation/sink operator and must have a previous \
                         execution node",
                        self.name
                    ),
                });
            };
            let listener = upstream.monitor();
            let tx = self.self_tx.clone();
            tokio::spawn(async move {
                let reason = listener.await.unwrap_or(ExitReason::Normal);
                let _ = tx.send(NodeMsg::UpstreamDown(reason));
            });
            self.upstream = Some(upstream);
        }
        // Instantiate the operator with its input type.
        let instance = self
            .op
            .instantiate(In::TYPE, &mut self.ctrl)
            .map_err(|error| EngineError::Unspecified {
                message: format!("`{}` failed to instantiate operator: {error}", self.name),
            })?;
        let sequence =
            FromInstance::from_instance(instance).map_err(|instance| EngineError::LogicError {
                message: format!(
                    "`{}` expected {} output, got {}",
                    self.name,
                    Out::TYPE,
                    instance.output_type()
                ),
            })?;
        self.instance = Some(sequence);
        if let Some(abort) = self.ctrl.abort_reason() {
            debug!("{} was aborted during instantiation", self.name);
            return Err(abort);
        }
        self.metrics.time_starting += starting.elapsed();
        // Tail-to-head: forward start through the rest of the chain. The
        // sink schedules its first run once the whole chain is up.
        if let Some(upstream) = self.upstream.clone() {
            debug!("{} delegates start to {}", self.name, upstream.name());
            upstream.start(previous).await?;
        }
        if Out::TYPE == ElementType::None {
            debug!("{} schedules run of sink after successful startup", self.name);
            self.schedule_run();
        }
        Ok(())
    }

    // ==== inbound side ====

    /// Ask the upstream node for more input if the free inbound capacity
    /// warrants it and no request is already in flight.
    fn request_more_input(&mut self) {
        if In::TYPE == ElementType::None {
            return;
        }
        let limits = limits::<In>();
        debug_assert!(self.inbound_buffered <= limits.max_buffered);
        let batch_size = (limits.max_buffered - self.inbound_buffered).min(limits.max_batch_size);
        let Some(upstream) = &self.upstream else {
            return;
        };
        if self.signaled_demand || batch_size < limits.min_batch_size {
            return;
        }
        let sink = NodeHandle::new(Arc::clone(&self.name), self.self_tx.clone());
        match upstream.send_pull(sink, batch_size, MAX_BATCH_TIMEOUT) {
            Ok(response) => {
                self.signaled_demand = true;
                let tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let result = response.await.unwrap_or(Err(EngineError::ReceiverDown));
                    let _ = tx.send(NodeMsg::PullResponded(result));
                });
            }
            Err(_) => {
                // The upstream mailbox is gone; the down notification follows.
                self.upstream = None;
            }
        }
    }

    fn on_pull_response(&mut self, result: Result<(), EngineError>) {
        self.signaled_demand = false;
        self.schedule_run();
        match result {
            Ok(()) => {}
            Err(error) if error.is_receiver_down() => {
                self.upstream = None;
            }
            Err(error) => {
                if self.upstream.is_some() {
                    self.ctrl.emit_diagnostic(
                        Diagnostic::warning(error.to_string())
                            .note(format!(
                                "`{}` failed to pull from previous execution node",
                                self.name
                            ))
                            .build(),
                    );
                }
            }
        }
    }

    fn push(&mut self, elements: Elements) -> Result<(), EngineError> {
        self.schedule_run();
        let batch = In::try_from_elements(elements).map_err(|elements| EngineError::LogicError {
            message: format!(
                "`{}` does not accept {} as input",
                self.name,
                elements.element_type()
            ),
        })?;
        let size = total_size(&batch);
        if size == 0 {
            return Err(EngineError::LogicError {
                message: "received empty batch".to_string(),
            });
        }
        if self.inbound_buffered + size > limits::<In>().max_buffered {
            return Err(EngineError::LogicError {
                message: "inbound buffer full".to_string(),
            });
        }
        self.metrics.inbound_batches += batch.len() as u64;
        self.metrics.inbound_total += size;
        self.inbound_buffered += size;
        self.inbound.extend(batch);
        Ok(())
    }

    fn on_upstream_down(&mut self, reason: ExitReason) {
        debug!("{} got down from previous execution node", self.name);
        self.upstream = None;
        // A response to our demand may never arrive now.
        self.signaled_demand = false;
        self.schedule_run();
        match reason {
            ExitReason::Normal => {}
            ExitReason::Failed(error) if error.is_silent() => {
                self.ctrl.abort(EngineError::Silent);
            }
            ExitReason::Failed(error) => {
                self.ctrl.abort(EngineError::Unspecified {
                    message: format!(
                        "`{}` shuts down because of irregular exit of previous operator: {error}",
                        self.name
                    ),
                });
            }
        }
    }

    // ==== outbound side ====

    fn pull(
        &mut self,
        sink: NodeHandle,
        batch_size: u64,
        batch_timeout: Duration,
        reply: tokio::sync::oneshot::Sender<Result<(), EngineError>>,
    ) {
        if Out::TYPE == ElementType::None {
            let _ = reply.send(Err(EngineError::LogicError {
                message: format!("`{}` is a sink and must not be pulled from", self.name),
            }));
            return;
        }
        if self.reject_demand {
            // End-of-stream: wait out the timeout, then complete with no
            // data so the puller observes it cleanly.
            tokio::spawn(async move {
                tokio::time::sleep(batch_timeout).await;
                let _ = reply.send(Ok(()));
            });
            return;
        }
        self.schedule_run();
        if self.demand.is_some() {
            let _ = reply.send(Err(EngineError::LogicError {
                message: "concurrent pull".to_string(),
            }));
            return;
        }
        let deadline = Instant::now() + batch_timeout;
        self.demand = Some(Demand {
            reply,
            sink,
            batch_size,
            deadline,
            ongoing: false,
        });
        // Arm the deadline so a partial delivery happens even if nothing
        // else wakes this node.
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(NodeMsg::DemandTimeout);
        });
    }

    async fn deliver_batches(&mut self, now: Instant, force: bool) {
        if Out::TYPE == ElementType::None {
            return;
        }
        let (batch_size, sink) = {
            let Some(demand) = self.demand.as_mut() else {
                return;
            };
            if demand.ongoing {
                return;
            }
            // Hold out for a fuller batch while the sequence is alive and
            // the deadline is ahead.
            if !force
                && !self.done
                && self.outbound_buffered < demand.batch_size
                && now < demand.deadline
            {
                return;
            }
            demand.ongoing = true;
            (demand.batch_size, demand.sink.clone())
        };
        let capped = self.outbound_buffered.min(batch_size);
        if capped == 0 {
            // Only legal when forced at end-of-sequence.
            debug!("{} short-circuits delivery of zero batches", self.name);
            if let Some(demand) = self.demand.take() {
                let _ = demand.reply.send(Ok(()));
            }
            self.schedule_run();
            return;
        }
        // The buffer is only touched once the sink has acknowledged; the
        // slices sent share storage with the buffered originals.
        let (head, _) = split(self.outbound.clone(), capped);
        let response = match sink.send_push(Out::wrap(head)) {
            Ok(response) => response,
            Err(error) => {
                self.finish_delivery(Err(error), capped);
                return;
            }
        };
        if force || self.outbound_buffered >= limits::<Out>().max_buffered {
            trace!(
                "{} pushes {}/{} buffered elements and suspends execution",
                self.name,
                capped,
                self.outbound_buffered
            );
            let result = tokio::select! {
                biased;
                _ = self.kill.cancelled() => return,
                result = response => result.unwrap_or(Err(EngineError::ReceiverDown)),
            };
            self.finish_delivery(result, capped);
        } else {
            trace!(
                "{} pushes {}/{} buffered elements",
                self.name,
                capped,
                self.outbound_buffered
            );
            self.push_in_flight = Some(capped);
            let tx = self.self_tx.clone();
            tokio::spawn(async move {
                let result = response.await.unwrap_or(Err(EngineError::ReceiverDown));
                let _ = tx.send(NodeMsg::PushAcked(result));
            });
        }
    }

    fn on_push_acked(&mut self, result: Result<(), EngineError>) {
        if let Some(capped) = self.push_in_flight.take() {
            self.finish_delivery(result, capped);
        }
    }

    fn finish_delivery(&mut self, result: Result<(), EngineError>, capped: u64) {
        let Some(demand) = self.demand.take() else {
            return;
        };
        match result {
            Ok(()) => {
                trace!("{} pushed successfully", self.name);
                let (head, tail) = split(mem::take(&mut self.outbound), capped);
                self.metrics.outbound_total += capped;
                self.metrics.outbound_batches += head.len() as u64;
                emit!(ElementsDelivered {
                    operator: self.name.to_string(),
                    count: capped,
                });
                emit!(BatchesDelivered {
                    operator: self.name.to_string(),
                    count: head.len() as u64,
                });
                self.outbound = tail;
                self.outbound_buffered = total_size(&self.outbound);
                let _ = demand.reply.send(Ok(()));
            }
            Err(error) => {
                debug!("{} failed to push", self.name);
                let _ = demand.reply.send(Err(error));
            }
        }
        self.schedule_run();
    }

    // ==== the run loop ====

    /// Advance the operator's sequence by one step, if the outbound buffer
    /// has room. Returns whether another advance would be useful within the
    /// same run.
    fn advance_sequence(&mut self) -> bool {
        if Out::TYPE != ElementType::None && self.outbound_buffered >= limits::<Out>().max_buffered
        {
            return false;
        }
        let Some(instance) = self.instance.as_mut() else {
            return false;
        };
        let running = Instant::now();
        let mut stalled = false;
        let mut input = Input::new(
            &mut self.inbound,
            &mut self.inbound_buffered,
            self.upstream.is_some(),
            self.signaled_demand,
            &mut stalled,
        );
        let step = instance.poll_next(&mut input, &mut self.ctrl);
        self.metrics.time_running += running.elapsed();
        let mut produced = false;
        match step {
            Step::Ready(element) => {
                let size = element.size();
                if size > 0 {
                    produced = true;
                    self.outbound_buffered += size;
                    self.outbound.push(element);
                }
            }
            Step::Empty => {}
            Step::Done => {
                self.done = true;
            }
        }
        self.stalled = stalled && !produced;
        !produced && !self.done
    }

    async fn run(&mut self) -> Option<ExitReason> {
        trace!("{} enters run loop", self.name);
        if self.instance.is_none() {
            return None;
        }
        // A latched abort terminates the node before any further progress.
        if let Some(error) = self.ctrl.abort_reason() {
            return Some(ExitReason::Failed(error));
        }
        let now = Instant::now();
        if self.done {
            debug!("{} is at the end of its sequence", self.name);
            // Shut down the previous execution node immediately; it would
            // otherwise keep producing into a dead end.
            if let Some(upstream) = self.upstream.take() {
                debug!("{} shuts down previous operator", self.name);
                upstream.exit(ExitReason::Normal);
            }
            if Out::TYPE != ElementType::None {
                if self.demand.is_some() && self.outbound_buffered == 0 {
                    debug!("{} rejects further demand from next operator", self.name);
                    self.reject_demand = true;
                }
                if self.demand.is_some() || self.outbound_buffered > 0 {
                    debug!("{} forcibly delivers batches", self.name);
                    self.deliver_batches(now, true).await;
                    if let Some(error) = self.ctrl.abort_reason() {
                        return Some(ExitReason::Failed(error));
                    }
                    self.schedule_run();
                    return None;
                }
            }
            return Some(ExitReason::Normal);
        }
        // Try to deliver.
        self.deliver_batches(now, false).await;
        // Request more input if there is more to be retrieved.
        self.request_more_input();
        // Produce more output if there is room.
        for _ in 0..MAX_ADVANCES_PER_RUN {
            if !self.advance_sequence() {
                break;
            }
        }
        if let Some(error) = self.ctrl.abort_reason() {
            return Some(ExitReason::Failed(error));
        }
        // Re-schedule another turn iff work remains.
        if Out::TYPE == ElementType::None {
            if !self.stalled {
                self.schedule_run();
            }
        } else if In::TYPE == ElementType::None {
            let can_generate =
                self.outbound_buffered < limits::<Out>().max_buffered && !self.done;
            if !self.stalled && (self.demand.is_some() || can_generate) {
                self.schedule_run();
            }
        } else {
            let can_generate =
                self.outbound_buffered < limits::<Out>().max_buffered && !self.done;
            let should_produce = self.demand.is_some();
            let upstream_dead = self.upstream.is_none();
            if upstream_dead || (!self.stalled && (should_produce || can_generate)) {
                self.schedule_run();
            }
        }
        None
    }

    fn schedule_run(&mut self) {
        if self.instance.is_none() || self.run_scheduled {
            return;
        }
        self.run_scheduled = true;
        let _ = self.self_tx.send(NodeMsg::Run);
    }

    // ==== shutdown ====

    fn terminate(&mut self, reason: ExitReason) {
        match &reason {
            ExitReason::Normal => {
                debug!("{} is done", self.name);
                self.log_metrics();
            }
            ExitReason::Failed(error) => {
                debug!("{} exits with error: {error}", self.name);
            }
        }
        emit!(ElementsConsumed {
            operator: self.name.to_string(),
            count: self.metrics.inbound_total,
        });
        for listener in self.monitors.drain(..) {
            let _ = listener.send(reason.clone());
        }
    }

    fn log_metrics(&self) {
        let elapsed = self.metrics.started_at.elapsed();
        let percentage = |part: Duration, whole: Duration| {
            if whole.is_zero() {
                0.0
            } else {
                part.as_secs_f64() / whole.as_secs_f64() * 100.0
            }
        };
        debug!(
            "{} was scheduled for {:.2}% of total runtime",
            self.name,
            percentage(self.metrics.time_scheduled, elapsed)
        );
        debug!(
            "{} spent {:.2}% of scheduled time starting and {:.2}% running",
            self.name,
            percentage(self.metrics.time_starting, self.metrics.time_scheduled),
            percentage(self.metrics.time_running, self.metrics.time_scheduled)
        );
        if self.metrics.inbound_batches > 0 {
            debug!(
                "{} inbound {} {} in {} batches, avg batch size {:.2}",
                self.name,
                self.metrics.inbound_total,
                In::TYPE,
                self.metrics.inbound_batches,
                self.metrics.inbound_total as f64 / self.metrics.inbound_batches as f64
            );
        }
        if self.metrics.outbound_batches > 0 {
            debug!(
                "{} outbound {} {} in {} batches, avg batch size {:.2}",
                self.name,
                self.metrics.outbound_total,
                Out::TYPE,
                self.metrics.outbound_batches,
                self.metrics.outbound_total as f64 / self.metrics.outbound_batches as f64
            );
        }
    }
}
