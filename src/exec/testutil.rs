//! Test operators and helpers shared by the engine tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use arrow::array::{Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::diagnostic::DiagnosticBus;
use crate::element::{Chunk, ElementType, EventBatch, Nil};
use crate::error::EngineError;
use crate::operator::{ExecCtrl, Input, Instance, Operator, Sequence, Step};

use super::message::{NodeHandle, NodeMsg};
use super::spawn::NodeCtx;

pub(crate) fn test_ctx(bus: &DiagnosticBus) -> NodeCtx {
    NodeCtx {
        diagnostics: bus.handle(),
        catalog: Arc::new(Catalog::new()),
        config: Arc::new(EngineConfig::default()),
        kill: CancellationToken::new(),
    }
}

pub(crate) fn make_batch(values: std::ops::Range<i64>) -> EventBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    let array = Int64Array::from_iter_values(values);
    EventBatch::new(RecordBatch::try_new(schema, vec![Arc::new(array)]).expect("valid batch"))
}

pub(crate) fn batch_values(batch: &EventBatch) -> Vec<i64> {
    batch
        .as_record_batch()
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int64 column")
        .values()
        .to_vec()
}

pub(crate) fn collected_values(batches: &[EventBatch]) -> Vec<i64> {
    batches.iter().flat_map(|b| batch_values(b)).collect()
}

/// A bare mailbox standing in for a peer node.
pub(crate) struct FakeNode {
    pub handle: NodeHandle,
    pub rx: mpsc::UnboundedReceiver<NodeMsg>,
}

impl FakeNode {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: NodeHandle::new(Arc::from(name), tx),
            rx,
        }
    }
}

// ==== sources ====

pub(crate) struct EventsSource {
    pub batches: Vec<EventBatch>,
}

impl fmt::Display for EventsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "events-source")
    }
}

impl Operator for EventsSource {
    fn name(&self) -> &str {
        "events-source"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::None => Ok(ElementType::Events),
            other => Err(EngineError::TypeMismatch {
                message: format!("`events-source` expects void, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        Ok(Instance::SourceEvents(Box::new(QueueSequence {
            queue: self.batches.clone().into(),
        })))
    }
}

pub(crate) struct BytesSource {
    pub chunks: Vec<Chunk>,
}

impl fmt::Display for BytesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes-source")
    }
}

impl Operator for BytesSource {
    fn name(&self) -> &str {
        "bytes-source"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::None => Ok(ElementType::Bytes),
            other => Err(EngineError::TypeMismatch {
                message: format!("`bytes-source` expects void, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        Ok(Instance::SourceBytes(Box::new(QueueSequence {
            queue: self.chunks.clone().into(),
        })))
    }
}

struct QueueSequence<T> {
    queue: VecDeque<T>,
}

impl<T: crate::element::Element> Sequence<Nil, T> for QueueSequence<T> {
    fn poll_next(&mut self, _input: &mut Input<'_, Nil>, _ctrl: &mut ExecCtrl) -> Step<T> {
        match self.queue.pop_front() {
            Some(element) => Step::Ready(element),
            None => Step::Done,
        }
    }
}

/// A source that never ends; used for shutdown tests.
pub(crate) struct InfiniteSource;

impl fmt::Display for InfiniteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "infinite-source")
    }
}

impl Operator for InfiniteSource {
    fn name(&self) -> &str {
        "infinite-source"
    }

    fn infer_output(&self, _input: ElementType) -> Result<ElementType, EngineError> {
        Ok(ElementType::Events)
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        struct Forever;
        impl Sequence<Nil, EventBatch> for Forever {
            fn poll_next(
                &mut self,
                _input: &mut Input<'_, Nil>,
                _ctrl: &mut ExecCtrl,
            ) -> Step<EventBatch> {
                Step::Ready(make_batch(0..16))
            }
        }
        Ok(Instance::SourceEvents(Box::new(Forever)))
    }
}

// ==== transformations ====

pub(crate) struct Passthrough;

impl fmt::Display for Passthrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "passthrough")
    }
}

impl Operator for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Events => Ok(ElementType::Events),
            other => Err(EngineError::TypeMismatch {
                message: format!("`passthrough` expects events, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        struct Forward;
        impl Sequence<EventBatch, EventBatch> for Forward {
            fn poll_next(
                &mut self,
                input: &mut Input<'_, EventBatch>,
                _ctrl: &mut ExecCtrl,
            ) -> Step<EventBatch> {
                match input.next() {
                    Step::Ready(batch) => Step::Ready(batch),
                    Step::Empty => Step::Empty,
                    Step::Done => Step::Done,
                }
            }
        }
        Ok(Instance::EventsToEvents(Box::new(Forward)))
    }
}

/// Passes batches through until the n-th one, then aborts the pipeline.
pub(crate) struct AbortOnNth {
    pub n: usize,
}

impl fmt::Display for AbortOnNth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "abort-on-nth {}", self.n)
    }
}

impl Operator for AbortOnNth {
    fn name(&self) -> &str {
        "abort-on-nth"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Events => Ok(ElementType::Events),
            other => Err(EngineError::TypeMismatch {
                message: format!("`abort-on-nth` expects events, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        struct Failing {
            n: usize,
            seen: usize,
        }
        impl Sequence<EventBatch, EventBatch> for Failing {
            fn poll_next(
                &mut self,
                input: &mut Input<'_, EventBatch>,
                ctrl: &mut ExecCtrl,
            ) -> Step<EventBatch> {
                match input.next() {
                    Step::Ready(batch) => {
                        self.seen += 1;
                        if self.seen >= self.n {
                            ctrl.abort(EngineError::Unspecified {
                                message: format!("operator failed on batch {}", self.seen),
                            });
                            return Step::Empty;
                        }
                        Step::Ready(batch)
                    }
                    Step::Empty => Step::Empty,
                    Step::Done => Step::Done,
                }
            }
        }
        Ok(Instance::EventsToEvents(Box::new(Failing {
            n: self.n,
            seen: 0,
        })))
    }
}

// ==== sinks ====

pub(crate) struct CollectSink {
    pub collected: Arc<Mutex<Vec<EventBatch>>>,
}

impl CollectSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<EventBatch>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                collected: Arc::clone(&collected),
            },
            collected,
        )
    }
}

impl fmt::Display for CollectSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collect-sink")
    }
}

impl Operator for CollectSink {
    fn name(&self) -> &str {
        "collect-sink"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Events => Ok(ElementType::None),
            other => Err(EngineError::TypeMismatch {
                message: format!("`collect-sink` expects events, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        struct Collecting {
            collected: Arc<Mutex<Vec<EventBatch>>>,
        }
        impl Sequence<EventBatch, Nil> for Collecting {
            fn poll_next(
                &mut self,
                input: &mut Input<'_, EventBatch>,
                _ctrl: &mut ExecCtrl,
            ) -> Step<Nil> {
                match input.next() {
                    Step::Ready(batch) => {
                        self.collected.lock().expect("collect store").push(batch);
                        Step::Empty
                    }
                    Step::Empty => Step::Empty,
                    Step::Done => Step::Done,
                }
            }
        }
        Ok(Instance::EventsSink(Box::new(Collecting {
            collected: Arc::clone(&self.collected),
        })))
    }
}
