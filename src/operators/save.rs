//! Savers: delivering byte chunks to their destination.
//!
//! A saver is the sink half of `write FMT to SINK`. Savers that require
//! joining consume a single concatenated byte stream; savers that do not can
//! be fused with the printer into one node.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::element::{Chunk, ElementType, Nil};
use crate::error::EngineError;
use crate::operator::{ExecCtrl, Input, Instance, Operator, Sequence, Step};
use crate::parse::{OperatorPlugin, Registry, SaverPlugin};

/// The sink half of a `write` operator.
pub trait Saver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this saver needs a single joined byte stream.
    fn requires_joining(&self) -> bool;

    /// The printer to use when `to SINK` names no format.
    fn default_printer(&self) -> Option<&str>;

    /// Create the per-pipeline saver state.
    fn make_saver(&self, ctrl: &mut ExecCtrl) -> Result<Box<dyn SaverInstance>, EngineError>;
}

/// Stateful byte consumer for one pipeline run.
pub trait SaverInstance: Send {
    fn save(&mut self, chunk: &Chunk) -> Result<(), EngineError>;

    fn finish(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

// ==== built-in savers ====

/// Append chunks to a file.
pub struct FileSaver {
    path: PathBuf,
}

impl FileSaver {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Saver for FileSaver {
    fn name(&self) -> &str {
        "file"
    }

    fn requires_joining(&self) -> bool {
        true
    }

    fn default_printer(&self) -> Option<&str> {
        Some("json")
    }

    fn make_saver(&self, _ctrl: &mut ExecCtrl) -> Result<Box<dyn SaverInstance>, EngineError> {
        let file = std::fs::File::create(&self.path).map_err(|e| EngineError::Unspecified {
            message: format!("failed to create {}: {e}", self.path.display()),
        })?;
        Ok(Box::new(WriterSaver {
            writer: Box::new(file),
        }))
    }
}

/// Write chunks to standard output.
pub struct StdoutSaver;

impl Saver for StdoutSaver {
    fn name(&self) -> &str {
        "stdout"
    }

    fn requires_joining(&self) -> bool {
        true
    }

    fn default_printer(&self) -> Option<&str> {
        Some("json")
    }

    fn make_saver(&self, _ctrl: &mut ExecCtrl) -> Result<Box<dyn SaverInstance>, EngineError> {
        Ok(Box::new(WriterSaver {
            writer: Box::new(std::io::stdout()),
        }))
    }
}

struct WriterSaver {
    writer: Box<dyn Write + Send>,
}

impl SaverInstance for WriterSaver {
    fn save(&mut self, chunk: &Chunk) -> Result<(), EngineError> {
        self.writer
            .write_all(chunk.as_bytes())
            .map_err(|e| EngineError::Unspecified {
                message: format!("failed to write output: {e}"),
            })
    }

    fn finish(&mut self) -> Result<(), EngineError> {
        self.writer.flush().map_err(|e| EngineError::Unspecified {
            message: format!("failed to flush output: {e}"),
        })
    }
}

/// Drop all chunks. Accepts independent per-schema streams, so it pairs
/// with any printer without joining.
pub struct DiscardSaver;

impl Saver for DiscardSaver {
    fn name(&self) -> &str {
        "discard"
    }

    fn requires_joining(&self) -> bool {
        false
    }

    fn default_printer(&self) -> Option<&str> {
        Some("json")
    }

    fn make_saver(&self, _ctrl: &mut ExecCtrl) -> Result<Box<dyn SaverInstance>, EngineError> {
        struct Discard;
        impl SaverInstance for Discard {
            fn save(&mut self, _chunk: &Chunk) -> Result<(), EngineError> {
                Ok(())
            }
        }
        Ok(Box::new(Discard))
    }
}

/// A saver that appends into shared memory; joining behavior is
/// configurable. Intended for tests and embedding.
pub struct CaptureSaver {
    joining: bool,
    data: Arc<Mutex<Vec<u8>>>,
}

impl CaptureSaver {
    pub fn new(joining: bool) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let data = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                joining,
                data: Arc::clone(&data),
            },
            data,
        )
    }
}

impl Saver for CaptureSaver {
    fn name(&self) -> &str {
        "capture"
    }

    fn requires_joining(&self) -> bool {
        self.joining
    }

    fn default_printer(&self) -> Option<&str> {
        Some("json")
    }

    fn make_saver(&self, _ctrl: &mut ExecCtrl) -> Result<Box<dyn SaverInstance>, EngineError> {
        struct Capture {
            data: Arc<Mutex<Vec<u8>>>,
        }
        impl SaverInstance for Capture {
            fn save(&mut self, chunk: &Chunk) -> Result<(), EngineError> {
                self.data
                    .lock()
                    .expect("capture store")
                    .extend_from_slice(chunk.as_bytes());
                Ok(())
            }
        }
        Ok(Box::new(Capture {
            data: Arc::clone(&self.data),
        }))
    }
}

// ==== the save operator ====

/// The operator for saving byte chunks: the sink half of a joined `write`.
pub struct SaveOperator {
    saver: Arc<dyn Saver>,
}

impl SaveOperator {
    pub fn new(saver: Arc<dyn Saver>) -> Self {
        Self { saver }
    }
}

impl fmt::Display for SaveOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "save {}", self.saver.name())
    }
}

impl Operator for SaveOperator {
    fn name(&self) -> &str {
        "save"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Bytes => Ok(ElementType::None),
            other => Err(EngineError::TypeMismatch {
                message: format!("`save {}` expects bytes, got {other}", self.saver.name()),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        let instance = self.saver.make_saver(ctrl)?;
        Ok(Instance::BytesSink(Box::new(SaveSequence {
            saver: instance,
        })))
    }
}

struct SaveSequence {
    saver: Box<dyn SaverInstance>,
}

impl Sequence<Chunk, Nil> for SaveSequence {
    fn poll_next(&mut self, input: &mut Input<'_, Chunk>, ctrl: &mut ExecCtrl) -> Step<Nil> {
        match input.next() {
            Step::Ready(chunk) => {
                if let Err(error) = self.saver.save(&chunk) {
                    ctrl.abort(error);
                }
                Step::Empty
            }
            Step::Empty => Step::Empty,
            Step::Done => {
                if let Err(error) = self.saver.finish() {
                    ctrl.abort(error);
                }
                Step::Done
            }
        }
    }
}

// ==== plugins ====

/// Parses the `file <path>`, `stdout`, and `discard` savers.
pub struct FileSaverPlugin;

impl SaverPlugin for FileSaverPlugin {
    fn name(&self) -> &str {
        "file"
    }

    fn parse(&self, args: &[&str]) -> Result<Arc<dyn Saver>, EngineError> {
        match args {
            [path] => Ok(Arc::new(FileSaver::new(PathBuf::from(path)))),
            _ => Err(EngineError::ParseError {
                message: "the file sink expects exactly one path".to_string(),
            }),
        }
    }
}

pub struct StdoutSaverPlugin;

impl SaverPlugin for StdoutSaverPlugin {
    fn name(&self) -> &str {
        "stdout"
    }

    fn parse(&self, args: &[&str]) -> Result<Arc<dyn Saver>, EngineError> {
        if !args.is_empty() {
            return Err(EngineError::ParseError {
                message: "the stdout sink takes no arguments".to_string(),
            });
        }
        Ok(Arc::new(StdoutSaver))
    }
}

pub struct DiscardSaverPlugin;

impl SaverPlugin for DiscardSaverPlugin {
    fn name(&self) -> &str {
        "discard"
    }

    fn parse(&self, args: &[&str]) -> Result<Arc<dyn Saver>, EngineError> {
        if !args.is_empty() {
            return Err(EngineError::ParseError {
                message: "the discard sink takes no arguments".to_string(),
            });
        }
        Ok(Arc::new(DiscardSaver))
    }
}

/// Parses the standalone `save SINK [args…]` operator.
pub struct SavePlugin;

impl OperatorPlugin for SavePlugin {
    fn name(&self) -> &str {
        "save"
    }

    fn parse(
        &self,
        args: &[&str],
        registry: &Registry,
    ) -> Result<Vec<Box<dyn Operator>>, EngineError> {
        let [saver_name, saver_args @ ..] = args else {
            return Err(EngineError::ParseError {
                message: "`save` expects a sink name".to_string(),
            });
        };
        let saver = registry.saver(saver_name)?.parse(saver_args)?;
        Ok(vec![Box::new(SaveOperator::new(saver))])
    }
}
