//! Printers: formatting event batches into byte chunks.
//!
//! A printer is the formatting half of `write FMT to SINK`. Printers that
//! allow joining produce one continuous byte stream across schemas; the
//! builder pairs them with sinks that require a single joined input.

use std::fmt;
use std::sync::Arc;

use arrow::json::LineDelimitedWriter;

use crate::element::{Chunk, ElementType, EventBatch};
use crate::error::EngineError;
use crate::operator::{ExecCtrl, Input, Instance, Operator, Sequence, Step};
use crate::parse::PrinterPlugin;

/// The formatting half of a `write` operator.
pub trait Printer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this printer may produce a single joined byte stream.
    fn allows_joining(&self) -> bool;

    /// The saver to use when `write FMT` names no sink.
    fn default_saver(&self) -> Option<&str>;

    /// Create the per-pipeline printer state.
    fn make_printer(&self, ctrl: &mut ExecCtrl) -> Result<Box<dyn PrinterInstance>, EngineError>;
}

/// Stateful formatter for one pipeline run.
pub trait PrinterInstance: Send {
    /// Format one batch into zero or more chunks.
    fn print(&mut self, batch: &EventBatch) -> Result<Vec<Chunk>, EngineError>;

    /// Flush any buffered output at end-of-stream.
    fn finish(&mut self) -> Result<Vec<Chunk>, EngineError> {
        Ok(Vec::new())
    }
}

/// Newline-delimited JSON via Arrow's JSON writer.
pub struct JsonPrinter;

impl Printer for JsonPrinter {
    fn name(&self) -> &str {
        "json"
    }

    fn allows_joining(&self) -> bool {
        true
    }

    fn default_saver(&self) -> Option<&str> {
        Some("stdout")
    }

    fn make_printer(&self, _ctrl: &mut ExecCtrl) -> Result<Box<dyn PrinterInstance>, EngineError> {
        Ok(Box::new(JsonPrinterInstance))
    }
}

struct JsonPrinterInstance;

impl PrinterInstance for JsonPrinterInstance {
    fn print(&mut self, batch: &EventBatch) -> Result<Vec<Chunk>, EngineError> {
        let mut writer = LineDelimitedWriter::new(Vec::new());
        writer
            .write(batch.as_record_batch())
            .and_then(|()| writer.finish())
            .map_err(|e| EngineError::Unspecified {
                message: format!("failed to render json: {e}"),
            })?;
        let rendered = writer.into_inner();
        if rendered.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![Chunk::from_vec(rendered)])
        }
    }
}

/// The operator for printing data that is joined later during pipeline
/// execution: `write FMT` against a joining sink.
pub struct PrintOperator {
    printer: Arc<dyn Printer>,
}

impl PrintOperator {
    pub fn new(printer: Arc<dyn Printer>) -> Self {
        Self { printer }
    }
}

impl fmt::Display for PrintOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write {}", self.printer.name())
    }
}

impl Operator for PrintOperator {
    fn name(&self) -> &str {
        "write"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Events => Ok(ElementType::Bytes),
            other => Err(EngineError::TypeMismatch {
                message: format!("`write {}` expects events, got {other}", self.printer.name()),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        let instance = self.printer.make_printer(ctrl)?;
        Ok(Instance::EventsToBytes(Box::new(PrintSequence {
            printer: instance,
            pending: Vec::new(),
            finished: false,
        })))
    }
}

struct PrintSequence {
    printer: Box<dyn PrinterInstance>,
    pending: Vec<Chunk>,
    finished: bool,
}

impl PrintSequence {
    fn queue(&mut self, chunks: Vec<Chunk>) {
        self.pending.extend(chunks.into_iter().filter(|c| !c.is_empty()));
    }

    fn next_pending(&mut self) -> Option<Chunk> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }
}

impl Sequence<EventBatch, Chunk> for PrintSequence {
    fn poll_next(&mut self, input: &mut Input<'_, EventBatch>, ctrl: &mut ExecCtrl) -> Step<Chunk> {
        if let Some(chunk) = self.next_pending() {
            return Step::Ready(chunk);
        }
        if self.finished {
            return Step::Done;
        }
        match input.next() {
            Step::Ready(batch) => match self.printer.print(&batch) {
                Ok(chunks) => {
                    self.queue(chunks);
                    match self.next_pending() {
                        Some(chunk) => Step::Ready(chunk),
                        None => Step::Empty,
                    }
                }
                Err(error) => {
                    ctrl.abort(error);
                    Step::Empty
                }
            },
            Step::Empty => Step::Empty,
            Step::Done => {
                self.finished = true;
                match self.printer.finish() {
                    Ok(chunks) => {
                        self.queue(chunks);
                        match self.next_pending() {
                            Some(chunk) => Step::Ready(chunk),
                            None => Step::Done,
                        }
                    }
                    Err(error) => {
                        ctrl.abort(error);
                        Step::Empty
                    }
                }
            }
        }
    }
}

/// Parses the `json` printer (no arguments).
pub struct JsonPrinterPlugin;

impl PrinterPlugin for JsonPrinterPlugin {
    fn name(&self) -> &str {
        "json"
    }

    fn parse(&self, args: &[&str]) -> Result<Arc<dyn Printer>, EngineError> {
        if !args.is_empty() {
            return Err(EngineError::ParseError {
                message: format!("the json format takes no arguments, got `{}`", args.join(" ")),
            });
        }
        Ok(Arc::new(JsonPrinter))
    }
}
