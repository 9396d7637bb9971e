//! The `slice` operator: select a row range from the event stream.
//!
//! Either bound may be negative, counting from the end of the stream
//! (Python-style). Positive ranges stream incrementally; ranges involving a
//! negative bound buffer as much of the stream as the bound requires before
//! emitting.

use std::collections::VecDeque;
use std::fmt;

use crate::element::{ElementType, EventBatch};
use crate::error::EngineError;
use crate::operator::{
    EventOrder, ExecCtrl, Input, Instance, Operator, Optimized, Sequence, Step,
};
use crate::parse::{OperatorPlugin, Registry};

/// Select `[begin, end)` of the input rows.
pub struct SliceOperator {
    begin: Option<i64>,
    end: Option<i64>,
}

impl SliceOperator {
    pub fn new(begin: Option<i64>, end: Option<i64>) -> Self {
        Self { begin, end }
    }
}

impl fmt::Display for SliceOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slice")?;
        if let Some(begin) = self.begin {
            write!(f, " --begin {begin}")?;
        }
        if let Some(end) = self.end {
            write!(f, " --end {end}")?;
        }
        Ok(())
    }
}

impl Operator for SliceOperator {
    fn name(&self) -> &str {
        "slice"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Events => Ok(ElementType::Events),
            other => Err(EngineError::TypeMismatch {
                message: format!("`slice` expects events, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        let sequence: Box<dyn Sequence<EventBatch, EventBatch>> = match (self.begin, self.end) {
            (None, None) => Box::new(Identity),
            (begin, Some(end)) if begin.unwrap_or(0) >= 0 && end >= 0 => {
                Box::new(PositiveRange::new(begin.unwrap_or(0), end))
            }
            (begin, end) if begin.unwrap_or(0) >= 0 => {
                Box::new(TailTruncated::new(begin.unwrap_or(0), end.unwrap_or(0)))
            }
            (Some(begin), Some(end)) if end >= 0 => Box::new(HeadTruncated::new(begin, end)),
            (begin, end) => Box::new(NegativeRange::new(begin.unwrap_or(0), end.unwrap_or(0))),
        };
        Ok(Instance::EventsToEvents(sequence))
    }

    fn optimize(&self, _order: EventOrder) -> Optimized {
        if self.begin.is_none() && self.end.is_none() {
            // Without bounds this operator is a no-op.
            return Optimized::Elided;
        }
        Optimized::Unchanged {
            order: EventOrder::Ordered,
        }
    }
}

struct Identity;

impl Sequence<EventBatch, EventBatch> for Identity {
    fn poll_next(
        &mut self,
        input: &mut Input<'_, EventBatch>,
        _ctrl: &mut ExecCtrl,
    ) -> Step<EventBatch> {
        input.next()
    }
}

/// `[begin, end)` with both bounds non-negative: a streaming clamp.
struct PositiveRange {
    begin: i64,
    end: i64,
    offset: i64,
    finished: bool,
}

impl PositiveRange {
    fn new(begin: i64, end: i64) -> Self {
        Self {
            begin,
            end,
            offset: 0,
            finished: end <= begin,
        }
    }
}

impl Sequence<EventBatch, EventBatch> for PositiveRange {
    fn poll_next(
        &mut self,
        input: &mut Input<'_, EventBatch>,
        _ctrl: &mut ExecCtrl,
    ) -> Step<EventBatch> {
        if self.finished {
            return Step::Done;
        }
        match input.next() {
            Step::Ready(slice) if slice.rows() == 0 => Step::Empty,
            Step::Ready(slice) => {
                let rows = slice.rows() as i64;
                let clamped_begin = (self.begin - self.offset).max(0);
                let clamped_end = (self.end - self.offset).min(rows).max(clamped_begin);
                let result = slice.slice(clamped_begin as u64, clamped_end as u64);
                self.offset += rows;
                if self.offset >= self.end {
                    self.finished = true;
                }
                Step::Ready(result)
            }
            Step::Empty => Step::Empty,
            Step::Done => Step::Done,
        }
    }
}

/// Non-negative begin with a negative end: buffer the tail-truncated
/// portion, resolve the end once the stream length is known, then emit.
struct TailTruncated {
    begin: i64,
    end: i64,
    offset: i64,
    buffer: VecDeque<EventBatch>,
    /// `(resolved_end, drained_rows)` once the input has ended.
    drain: Option<(i64, i64)>,
    finished: bool,
}

impl TailTruncated {
    fn new(begin: i64, end: i64) -> Self {
        Self {
            begin,
            end,
            offset: 0,
            buffer: VecDeque::new(),
            drain: None,
            finished: false,
        }
    }
}

impl Sequence<EventBatch, EventBatch> for TailTruncated {
    fn poll_next(
        &mut self,
        input: &mut Input<'_, EventBatch>,
        _ctrl: &mut ExecCtrl,
    ) -> Step<EventBatch> {
        if self.finished {
            return Step::Done;
        }
        if self.drain.is_none() {
            return match input.next() {
                Step::Ready(slice) if slice.rows() == 0 => Step::Empty,
                Step::Ready(slice) => {
                    let rows = slice.rows() as i64;
                    let clamped_begin = (self.begin - self.offset).max(0);
                    let result = slice.slice(clamped_begin as u64, rows as u64);
                    if result.rows() > 0 {
                        self.buffer.push_back(result);
                    }
                    self.offset += rows;
                    Step::Empty
                }
                Step::Empty => Step::Empty,
                Step::Done => {
                    let resolved = self.offset + self.end - self.begin;
                    if resolved < 0 {
                        self.finished = true;
                        return Step::Done;
                    }
                    self.drain = Some((resolved, 0));
                    Step::Empty
                }
            };
        }
        let Some((resolved_end, drained)) = self.drain else {
            return Step::Done;
        };
        match self.buffer.pop_front() {
            Some(slice) => {
                let rows = slice.rows() as i64;
                let clamped_end = (resolved_end - drained).min(rows).max(0);
                let result = slice.slice(0, clamped_end as u64);
                if result.rows() == 0 {
                    self.finished = true;
                    return Step::Done;
                }
                self.drain = Some((resolved_end, drained + rows));
                Step::Ready(result)
            }
            None => {
                self.finished = true;
                Step::Done
            }
        }
    }
}

/// Negative begin with a non-negative end: stream while clamping the end,
/// then drop the prefix once the stream length is known.
struct HeadTruncated {
    begin: i64,
    end: i64,
    offset: i64,
    buffer: VecDeque<EventBatch>,
    drain: Option<(i64, i64)>,
    finished: bool,
}

impl HeadTruncated {
    fn new(begin: i64, end: i64) -> Self {
        Self {
            begin,
            end,
            offset: 0,
            buffer: VecDeque::new(),
            drain: None,
            finished: false,
        }
    }

    /// The stream length is known; resolve the negative begin.
    fn resolve(&mut self) -> Step<EventBatch> {
        let resolved = self.offset + self.begin;
        if resolved >= self.offset {
            self.finished = true;
            return Step::Done;
        }
        self.drain = Some((resolved, 0));
        Step::Empty
    }
}

impl Sequence<EventBatch, EventBatch> for HeadTruncated {
    fn poll_next(
        &mut self,
        input: &mut Input<'_, EventBatch>,
        _ctrl: &mut ExecCtrl,
    ) -> Step<EventBatch> {
        if self.finished {
            return Step::Done;
        }
        if self.drain.is_none() {
            return match input.next() {
                Step::Ready(slice) if slice.rows() == 0 => Step::Empty,
                Step::Ready(slice) => {
                    let rows = slice.rows() as i64;
                    let clamped_end = (self.end - self.offset).min(rows).max(0);
                    self.offset += rows;
                    let result = slice.slice(0, clamped_end as u64);
                    if result.rows() == 0 {
                        // The end bound is exhausted; stop consuming input.
                        return self.resolve();
                    }
                    self.buffer.push_back(result);
                    Step::Empty
                }
                Step::Empty => Step::Empty,
                Step::Done => self.resolve(),
            };
        }
        let Some((resolved_begin, mut drained)) = self.drain else {
            return Step::Done;
        };
        loop {
            match self.buffer.pop_front() {
                Some(slice) => {
                    let rows = slice.rows() as i64;
                    let clamped_begin = (resolved_begin - drained).max(0);
                    drained += rows;
                    if clamped_begin >= rows {
                        continue;
                    }
                    let result = slice.slice(clamped_begin as u64, rows as u64);
                    if result.rows() == 0 {
                        continue;
                    }
                    self.drain = Some((resolved_begin, drained));
                    return Step::Ready(result);
                }
                None => {
                    self.finished = true;
                    return Step::Done;
                }
            }
        }
    }
}

/// Both bounds negative: buffer the whole stream, then emit the resolved
/// range.
struct NegativeRange {
    begin: i64,
    end: i64,
    offset: i64,
    buffer: VecDeque<EventBatch>,
    drain: Option<(i64, i64, i64)>,
    finished: bool,
}

impl NegativeRange {
    fn new(begin: i64, end: i64) -> Self {
        Self {
            begin,
            end,
            offset: 0,
            buffer: VecDeque::new(),
            drain: None,
            finished: end <= begin,
        }
    }
}

impl Sequence<EventBatch, EventBatch> for NegativeRange {
    fn poll_next(
        &mut self,
        input: &mut Input<'_, EventBatch>,
        _ctrl: &mut ExecCtrl,
    ) -> Step<EventBatch> {
        if self.finished {
            return Step::Done;
        }
        if self.drain.is_none() {
            return match input.next() {
                Step::Ready(slice) if slice.rows() == 0 => Step::Empty,
                Step::Ready(slice) => {
                    self.offset += slice.rows() as i64;
                    self.buffer.push_back(slice);
                    Step::Empty
                }
                Step::Empty => Step::Empty,
                Step::Done => {
                    let resolved_begin = self.offset + self.begin;
                    let resolved_end = self.offset + self.end;
                    self.drain = Some((resolved_begin, resolved_end, 0));
                    Step::Empty
                }
            };
        }
        let Some((resolved_begin, resolved_end, mut drained)) = self.drain else {
            return Step::Done;
        };
        loop {
            match self.buffer.pop_front() {
                Some(slice) => {
                    let rows = slice.rows() as i64;
                    let clamped_begin = (resolved_begin - drained).max(0);
                    let clamped_end = (resolved_end - drained).min(rows).max(0);
                    drained += rows;
                    if clamped_begin >= rows {
                        continue;
                    }
                    let result = slice.slice(clamped_begin as u64, clamped_end as u64);
                    if result.rows() == 0 {
                        self.finished = true;
                        return Step::Done;
                    }
                    self.drain = Some((resolved_begin, resolved_end, drained));
                    return Step::Ready(result);
                }
                None => {
                    self.finished = true;
                    return Step::Done;
                }
            }
        }
    }
}

/// Parses `slice [--begin <n>] [--end <n>]`.
pub struct SlicePlugin;

impl OperatorPlugin for SlicePlugin {
    fn name(&self) -> &str {
        "slice"
    }

    fn parse(
        &self,
        args: &[&str],
        _registry: &Registry,
    ) -> Result<Vec<Box<dyn Operator>>, EngineError> {
        let mut begin = None;
        let mut end = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let (flag, value) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (*arg, iter.next().map(|v| v.to_string())),
            };
            let target = match flag {
                "--begin" => &mut begin,
                "--end" => &mut end,
                other => {
                    return Err(EngineError::ParseError {
                        message: format!("`slice` does not understand `{other}`"),
                    });
                }
            };
            let Some(value) = value else {
                return Err(EngineError::ParseError {
                    message: format!("`slice {flag}` requires a value"),
                });
            };
            let parsed = value.parse::<i64>().map_err(|_| EngineError::ParseError {
                message: format!("`slice {flag}` expects an integer, got `{value}`"),
            })?;
            *target = Some(parsed);
        }
        Ok(vec![Box::new(SliceOperator::new(begin, end))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::Catalog;
    use crate::config::EngineConfig;
    use crate::diagnostic::DiagnosticBus;
    use crate::element::total_size;
    use crate::exec::testutil::{collected_values, make_batch};

    fn ctrl(bus: &DiagnosticBus) -> ExecCtrl {
        ExecCtrl::new(
            "slice".to_string(),
            bus.handle(),
            Arc::new(Catalog::new()),
            Arc::new(EngineConfig::default()),
        )
    }

    /// Drive a slice configuration over the given batches to completion.
    fn run_slice(
        begin: Option<i64>,
        end: Option<i64>,
        batches: Vec<EventBatch>,
    ) -> Vec<EventBatch> {
        let bus = DiagnosticBus::spawn();
        let mut ctrl = ctrl(&bus);
        let op = SliceOperator::new(begin, end);
        let instance = op
            .instantiate(ElementType::Events, &mut ctrl)
            .expect("instantiate");
        let Instance::EventsToEvents(mut sequence) = instance else {
            panic!("slice must produce events");
        };
        let mut queue: VecDeque<EventBatch> = batches.into();
        let mut buffered = total_size(queue.make_contiguous());
        let mut out = Vec::new();
        loop {
            let mut stalled = false;
            let mut input = Input::new(&mut queue, &mut buffered, false, false, &mut stalled);
            match sequence.poll_next(&mut input, &mut ctrl) {
                Step::Ready(batch) => {
                    if batch.rows() > 0 {
                        out.push(batch);
                    }
                }
                Step::Empty => {}
                Step::Done => break,
            }
        }
        out
    }

    fn rows(out: &[EventBatch]) -> Vec<i64> {
        collected_values(out)
    }

    #[tokio::test]
    async fn test_positive_range_preserves_batch_boundaries() {
        let batches = vec![make_batch(0..10), make_batch(10..20), make_batch(20..30)];
        let out = run_slice(Some(5), Some(25), batches);
        assert_eq!(rows(&out), (5..25).collect::<Vec<_>>());
        let sizes: Vec<u64> = out.iter().map(EventBatch::rows).collect();
        assert_eq!(sizes, vec![5, 10, 5]);
    }

    #[tokio::test]
    async fn test_begin_only_yields_suffix() {
        let batches = vec![make_batch(0..10), make_batch(10..20)];
        let out = run_slice(Some(15), None, batches);
        assert_eq!(rows(&out), (15..20).collect::<Vec<_>>());

        let batches = vec![make_batch(0..10), make_batch(10..20)];
        let out = run_slice(Some(25), None, batches);
        assert_eq!(rows(&out), Vec::<i64>::new());
    }

    #[tokio::test]
    async fn test_negative_begin_yields_tail() {
        let batches = (0..10).map(|i| make_batch(i * 10..(i + 1) * 10)).collect();
        let out = run_slice(Some(-10), None, batches);
        assert_eq!(rows(&out), (90..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_negative_begin_negative_end() {
        let batches = (0..10).map(|i| make_batch(i * 10..(i + 1) * 10)).collect();
        let out = run_slice(Some(-10), Some(-5), batches);
        assert_eq!(rows(&out), (90..95).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_positive_begin_negative_end() {
        let batches = vec![make_batch(0..10), make_batch(10..20), make_batch(20..30)];
        let out = run_slice(Some(5), Some(-5), batches);
        assert_eq!(rows(&out), (5..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_negative_begin_positive_end() {
        let batches = vec![make_batch(0..10), make_batch(10..20), make_batch(20..30)];
        let out = run_slice(Some(-25), Some(20), batches);
        assert_eq!(rows(&out), (5..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_when_end_before_begin() {
        let batches = vec![make_batch(0..10)];
        assert_eq!(rows(&run_slice(Some(7), Some(3), batches)), Vec::<i64>::new());
        let batches = vec![make_batch(0..10)];
        assert_eq!(rows(&run_slice(Some(-3), Some(-7), batches)), Vec::<i64>::new());
    }

    #[tokio::test]
    async fn test_empty_input_batches_pass_as_fairness() {
        let schema = make_batch(0..1).schema();
        let batches = vec![
            EventBatch::empty(Arc::clone(&schema)),
            make_batch(0..10),
            EventBatch::empty(schema),
        ];
        let out = run_slice(Some(2), Some(8), batches);
        assert_eq!(rows(&out), (2..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_optimize_elides_unbounded_slice() {
        let op = SliceOperator::new(None, None);
        assert!(matches!(
            op.optimize(EventOrder::Ordered),
            Optimized::Elided
        ));
        let op = SliceOperator::new(Some(1), None);
        assert!(matches!(
            op.optimize(EventOrder::Ordered),
            Optimized::Unchanged { .. }
        ));
    }

    #[test]
    fn test_parse_arguments() {
        let registry = Registry::with_defaults();
        let plugin = SlicePlugin;
        let ops = plugin
            .parse(&["--begin", "5", "--end=-3"], &registry)
            .expect("parse");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].to_string(), "slice --begin 5 --end -3");

        assert!(plugin.parse(&["--begin"], &registry).is_err());
        assert!(plugin.parse(&["--begin", "x"], &registry).is_err());
        assert!(plugin.parse(&["--middle", "1"], &registry).is_err());
    }
}
