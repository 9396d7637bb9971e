//! The operator contract.
//!
//! An [`Operator`] is an immutable description of a pipeline stage. The
//! engine type-checks the chain through [`Operator::infer_output`], then
//! instantiates each operator into a lazy, single-pass sequence that the
//! owning execution node advances at most once per scheduler turn.

mod control;

pub use control::ExecCtrl;

use std::collections::VecDeque;
use std::fmt;

use crate::element::{Chunk, Element, ElementType, EventBatch, Nil};
use crate::error::EngineError;

/// One step of a lazy sequence.
#[derive(Debug)]
pub enum Step<T> {
    /// The sequence produced an element. A zero-size element is treated
    /// like [`Step::Empty`] by the runtime.
    Ready(T),
    /// The empty yield: progress was made but nothing was produced;
    /// reschedule and poll again.
    Empty,
    /// The sequence is exhausted.
    Done,
}

/// The input side of an operator, viewed one element at a time.
///
/// Hands out buffered upstream elements in arrival order. While the upstream
/// node is alive or a request for more input is in flight, an empty buffer
/// yields [`Step::Empty`] so the operator can return control to the
/// scheduler; only after the upstream is gone and the buffer has drained does
/// it yield [`Step::Done`].
pub struct Input<'a, T: Element> {
    queue: &'a mut VecDeque<T>,
    buffered: &'a mut u64,
    upstream_alive: bool,
    request_in_flight: bool,
    stalled: &'a mut bool,
}

impl<'a, T: Element> Input<'a, T> {
    pub(crate) fn new(
        queue: &'a mut VecDeque<T>,
        buffered: &'a mut u64,
        upstream_alive: bool,
        request_in_flight: bool,
        stalled: &'a mut bool,
    ) -> Self {
        Self {
            queue,
            buffered,
            upstream_alive,
            request_in_flight,
            stalled,
        }
    }

    /// Fetch the next input element, an empty token, or end-of-input.
    pub fn next(&mut self) -> Step<T> {
        match self.queue.pop_front() {
            Some(element) => {
                *self.buffered -= element.size();
                *self.stalled = false;
                Step::Ready(element)
            }
            None if self.upstream_alive || self.request_in_flight => {
                *self.stalled = true;
                Step::Empty
            }
            None => Step::Done,
        }
    }
}

/// A lazy, single-pass sequence of output elements.
///
/// The runtime calls `poll_next` at most once per scheduler turn, so an
/// implementation that suspends on a request through the control plane
/// resumes cleanly on the next turn. Implementations must not hold references
/// into input elements across calls; take ownership instead.
pub trait Sequence<In: Element, Out: Element>: Send {
    fn poll_next(&mut self, input: &mut Input<'_, In>, ctrl: &mut ExecCtrl) -> Step<Out>;
}

/// An instantiated operator, tagged by its input and output element types.
pub enum Instance {
    SourceEvents(Box<dyn Sequence<Nil, EventBatch>>),
    SourceBytes(Box<dyn Sequence<Nil, Chunk>>),
    EventsToEvents(Box<dyn Sequence<EventBatch, EventBatch>>),
    EventsToBytes(Box<dyn Sequence<EventBatch, Chunk>>),
    EventsSink(Box<dyn Sequence<EventBatch, Nil>>),
    BytesToEvents(Box<dyn Sequence<Chunk, EventBatch>>),
    BytesToBytes(Box<dyn Sequence<Chunk, Chunk>>),
    BytesSink(Box<dyn Sequence<Chunk, Nil>>),
}

impl Instance {
    pub fn input_type(&self) -> ElementType {
        match self {
            Instance::SourceEvents(_) | Instance::SourceBytes(_) => ElementType::None,
            Instance::EventsToEvents(_) | Instance::EventsToBytes(_) | Instance::EventsSink(_) => {
                ElementType::Events
            }
            Instance::BytesToEvents(_) | Instance::BytesToBytes(_) | Instance::BytesSink(_) => {
                ElementType::Bytes
            }
        }
    }

    pub fn output_type(&self) -> ElementType {
        match self {
            Instance::EventsSink(_) | Instance::BytesSink(_) => ElementType::None,
            Instance::SourceEvents(_) | Instance::EventsToEvents(_) | Instance::BytesToEvents(_) => {
                ElementType::Events
            }
            Instance::SourceBytes(_) | Instance::EventsToBytes(_) | Instance::BytesToBytes(_) => {
                ElementType::Bytes
            }
        }
    }
}

/// Recover the typed sequence from a tagged [`Instance`].
///
/// Implemented for each valid `(input, output)` combination so that
/// monomorphized execution nodes can unwrap the instance they expect and
/// reject anything else with a logic error.
pub trait FromInstance: Sized {
    fn from_instance(instance: Instance) -> Result<Self, Instance>;
}

macro_rules! impl_from_instance {
    ($variant:ident, $in:ty, $out:ty) => {
        impl FromInstance for Box<dyn Sequence<$in, $out>> {
            fn from_instance(instance: Instance) -> Result<Self, Instance> {
                match instance {
                    Instance::$variant(sequence) => Ok(sequence),
                    other => Err(other),
                }
            }
        }
    };
}

impl_from_instance!(SourceEvents, Nil, EventBatch);
impl_from_instance!(SourceBytes, Nil, Chunk);
impl_from_instance!(EventsToEvents, EventBatch, EventBatch);
impl_from_instance!(EventsToBytes, EventBatch, Chunk);
impl_from_instance!(EventsSink, EventBatch, Nil);
impl_from_instance!(BytesToEvents, Chunk, EventBatch);
impl_from_instance!(BytesToBytes, Chunk, Chunk);
impl_from_instance!(BytesSink, Chunk, Nil);

/// Where an operator is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Anywhere in the local process.
    Local,
    /// Requires a node context; fails construction without one.
    Remote,
}

/// Whether downstream may observe events out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrder {
    Ordered,
    Unordered,
}

/// Outcome of asking an operator to optimize itself.
pub enum Optimized {
    /// Keep the operator; it passes events through in the given order.
    Unchanged { order: EventOrder },
    /// The operator is a no-op for its current arguments and can be removed
    /// from the chain.
    Elided,
}

/// An immutable description of a pipeline stage.
///
/// The `Display` impl renders the operator the way a user would have written
/// it (`slice --begin 5`); diagnostics quote it verbatim.
pub trait Operator: fmt::Display + Send + Sync {
    /// The operator's name as registered in the pipeline surface.
    fn name(&self) -> &str;

    /// Compute the output element type for a given input type, or reject
    /// the chaining.
    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError>;

    /// Where this operator must run.
    fn location(&self) -> Location {
        Location::Local
    }

    /// Whether this operator requests a dedicated worker.
    fn detached(&self) -> bool {
        false
    }

    /// Create the lazy output sequence for this operator.
    ///
    /// Called exactly once per execution node, after type inference. The
    /// returned instance's output type must match the inferred one. A fatal
    /// condition during setup may either return an error or abort through
    /// `ctrl`.
    fn instantiate(&self, input: ElementType, ctrl: &mut ExecCtrl)
        -> Result<Instance, EngineError>;

    /// Report order preservation and allow the builder to elide no-ops.
    fn optimize(&self, order: EventOrder) -> Optimized {
        Optimized::Unchanged { order }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_yields_fifo_then_empty() {
        let mut queue: VecDeque<Chunk> = VecDeque::new();
        queue.push_back(Chunk::from_vec(vec![1, 2]));
        queue.push_back(Chunk::from_vec(vec![3]));
        let mut buffered = 3;
        let mut stalled = false;
        let mut input = Input::new(&mut queue, &mut buffered, true, false, &mut stalled);

        assert!(matches!(input.next(), Step::Ready(c) if c.len() == 2));
        assert!(matches!(input.next(), Step::Ready(c) if c.len() == 1));
        assert!(matches!(input.next(), Step::Empty));
        assert!(stalled);
        assert_eq!(buffered, 0);
    }

    #[test]
    fn test_input_ends_when_upstream_gone() {
        let mut queue: VecDeque<Chunk> = VecDeque::new();
        let mut buffered = 0;
        let mut stalled = false;
        let mut input = Input::new(&mut queue, &mut buffered, false, false, &mut stalled);
        assert!(matches!(input.next(), Step::Done));
        assert!(!stalled);
    }

    #[test]
    fn test_input_pending_while_request_in_flight() {
        let mut queue: VecDeque<Chunk> = VecDeque::new();
        let mut buffered = 0;
        let mut stalled = false;
        let mut input = Input::new(&mut queue, &mut buffered, false, true, &mut stalled);
        assert!(matches!(input.next(), Step::Empty));
    }

    #[test]
    fn test_instance_types() {
        struct Never;
        impl Sequence<Nil, EventBatch> for Never {
            fn poll_next(
                &mut self,
                _input: &mut Input<'_, Nil>,
                _ctrl: &mut ExecCtrl,
            ) -> Step<EventBatch> {
                Step::Done
            }
        }
        let instance = Instance::SourceEvents(Box::new(Never));
        assert_eq!(instance.input_type(), ElementType::None);
        assert_eq!(instance.output_type(), ElementType::Events);

        let unwrapped: Result<Box<dyn Sequence<Nil, EventBatch>>, _> =
            FromInstance::from_instance(instance);
        assert!(unwrapped.is_ok());
    }
}
