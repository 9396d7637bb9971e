//! The `write FMT [to SINK]` and `to SINK [write FMT]` composites.
//!
//! Their desugaring touches the engine: when the sink does not require a
//! joined byte stream, printing and saving fuse into a single node; when it
//! does, the composite expands into sequential `write FMT` and `save SINK`
//! nodes. A joining sink combined with a printer that disallows joining is
//! rejected at construction time.

use std::fmt;
use std::sync::Arc;

use crate::element::{ElementType, EventBatch, Nil};
use crate::error::EngineError;
use crate::operator::{ExecCtrl, Input, Instance, Operator, Sequence, Step};
use crate::parse::{OperatorPlugin, Registry};

use super::print::{PrintOperator, Printer, PrinterInstance};
use super::save::{SaveOperator, Saver, SaverInstance};

/// Desugar a printer/saver pair into its operator chain.
///
/// Fails with an invalid-argument error when the sink requires a single
/// joined input but the format has potentially multiple outputs.
pub fn make_write_operators(
    printer: Arc<dyn Printer>,
    saver: Arc<dyn Saver>,
) -> Result<Vec<Box<dyn Operator>>, EngineError> {
    if saver.requires_joining() && !printer.allows_joining() {
        return Err(EngineError::InvalidArgument {
            message: format!(
                "writing '{0}' to '{1}' is not allowed; the sink '{1}' requires a single input, \
                 and the format '{0}' has potentially multiple outputs",
                printer.name(),
                saver.name()
            ),
        });
    }
    if !saver.requires_joining() {
        return Ok(vec![Box::new(PrintSaveOperator { printer, saver })]);
    }
    Ok(vec![
        Box::new(PrintOperator::new(printer)),
        Box::new(SaveOperator::new(saver)),
    ])
}

/// The fused operator for printing and saving without joining.
pub struct PrintSaveOperator {
    printer: Arc<dyn Printer>,
    saver: Arc<dyn Saver>,
}

impl fmt::Display for PrintSaveOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write {} to {}", self.printer.name(), self.saver.name())
    }
}

impl Operator for PrintSaveOperator {
    fn name(&self) -> &str {
        "write"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Events => Ok(ElementType::None),
            other => Err(EngineError::TypeMismatch {
                message: format!("`{self}` expects events, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        let printer = self.printer.make_printer(ctrl)?;
        let saver = self.saver.make_saver(ctrl)?;
        Ok(Instance::EventsSink(Box::new(PrintSaveSequence {
            printer,
            saver,
        })))
    }
}

struct PrintSaveSequence {
    printer: Box<dyn PrinterInstance>,
    saver: Box<dyn SaverInstance>,
}

impl PrintSaveSequence {
    fn write_through(&mut self, batch: &EventBatch) -> Result<(), EngineError> {
        for chunk in self.printer.print(batch)? {
            self.saver.save(&chunk)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EngineError> {
        for chunk in self.printer.finish()? {
            self.saver.save(&chunk)?;
        }
        self.saver.finish()
    }
}

impl Sequence<EventBatch, Nil> for PrintSaveSequence {
    fn poll_next(&mut self, input: &mut Input<'_, EventBatch>, ctrl: &mut ExecCtrl) -> Step<Nil> {
        match input.next() {
            Step::Ready(batch) => {
                if let Err(error) = self.write_through(&batch) {
                    ctrl.abort(error);
                }
                Step::Empty
            }
            Step::Empty => Step::Empty,
            Step::Done => {
                if let Err(error) = self.finish() {
                    ctrl.abort(error);
                }
                Step::Done
            }
        }
    }
}

/// Parses `write FMT [fmt-args…] [to SINK [sink-args…]]`.
pub struct WritePlugin;

impl OperatorPlugin for WritePlugin {
    fn name(&self) -> &str {
        "write"
    }

    fn parse(
        &self,
        args: &[&str],
        registry: &Registry,
    ) -> Result<Vec<Box<dyn Operator>>, EngineError> {
        let [printer_name, rest @ ..] = args else {
            return Err(EngineError::ParseError {
                message: "`write` expects a format name".to_string(),
            });
        };
        let (printer_args, saver_spec) = match rest.iter().position(|t| *t == "to") {
            Some(at) => (&rest[..at], Some(&rest[at + 1..])),
            None => (rest, None),
        };
        let printer = registry.printer(printer_name)?.parse(printer_args)?;
        let saver = match saver_spec {
            Some([saver_name, saver_args @ ..]) => registry.saver(saver_name)?.parse(saver_args)?,
            Some([]) => {
                return Err(EngineError::ParseError {
                    message: "`write … to` expects a sink name".to_string(),
                });
            }
            None => default_saver(registry, printer.as_ref())?,
        };
        make_write_operators(printer, saver)
    }
}

/// Parses `to SINK [sink-args…] [write FMT [fmt-args…]]`.
pub struct ToPlugin;

impl OperatorPlugin for ToPlugin {
    fn name(&self) -> &str {
        "to"
    }

    fn parse(
        &self,
        args: &[&str],
        registry: &Registry,
    ) -> Result<Vec<Box<dyn Operator>>, EngineError> {
        let [saver_name, rest @ ..] = args else {
            return Err(EngineError::ParseError {
                message: "`to` expects a sink name".to_string(),
            });
        };
        let (saver_args, printer_spec) = match rest.iter().position(|t| *t == "write") {
            Some(at) => (&rest[..at], Some(&rest[at + 1..])),
            None => (rest, None),
        };
        let saver = registry.saver(saver_name)?.parse(saver_args)?;
        let printer = match printer_spec {
            Some([printer_name, printer_args @ ..]) => {
                registry.printer(printer_name)?.parse(printer_args)?
            }
            Some([]) => {
                return Err(EngineError::ParseError {
                    message: "`to … write` expects a format name".to_string(),
                });
            }
            None => default_printer(registry, saver.as_ref())?,
        };
        make_write_operators(printer, saver)
    }
}

fn default_saver(
    registry: &Registry,
    printer: &dyn Printer,
) -> Result<Arc<dyn Saver>, EngineError> {
    let name = printer
        .default_saver()
        .ok_or_else(|| EngineError::InvalidConfiguration {
            message: format!(
                "no available default sink for printing '{}' output",
                printer.name()
            ),
        })?;
    registry.saver(name)?.parse(&[])
}

fn default_printer(
    registry: &Registry,
    saver: &dyn Saver,
) -> Result<Arc<dyn Printer>, EngineError> {
    let name = saver
        .default_printer()
        .ok_or_else(|| EngineError::InvalidConfiguration {
            message: format!("no available default format for sink '{}'", saver.name()),
        })?;
    registry.printer(name)?.parse(&[])
}
