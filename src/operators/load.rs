//! The `load` operator: read a file into the pipeline as byte chunks.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::element::{Chunk, ElementType, Nil};
use crate::error::EngineError;
use crate::operator::{ExecCtrl, Input, Instance, Operator, Sequence, Step};
use crate::parse::{OperatorPlugin, Registry};

/// One read per poll; sized to the byte-stream batch cap.
const READ_SIZE: usize = 1024 * 1024;

/// Stream a file's contents as byte chunks.
pub struct LoadOperator {
    path: PathBuf,
}

impl LoadOperator {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl fmt::Display for LoadOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load {}", self.path.display())
    }
}

impl Operator for LoadOperator {
    fn name(&self) -> &str {
        "load"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::None => Ok(ElementType::Bytes),
            other => Err(EngineError::TypeMismatch {
                message: format!("`load` is a source and cannot take {other} input"),
            }),
        }
    }

    /// File reads block; keep them off the shared workers.
    fn detached(&self) -> bool {
        true
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        Ok(Instance::SourceBytes(Box::new(LoadSequence {
            path: self.path.clone(),
            file: None,
            finished: false,
        })))
    }
}

struct LoadSequence {
    path: PathBuf,
    file: Option<File>,
    finished: bool,
}

impl Sequence<Nil, Chunk> for LoadSequence {
    fn poll_next(&mut self, _input: &mut Input<'_, Nil>, ctrl: &mut ExecCtrl) -> Step<Chunk> {
        if self.finished {
            return Step::Done;
        }
        if self.file.is_none() {
            match File::open(&self.path) {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    self.finished = true;
                    ctrl.abort(EngineError::Unspecified {
                        message: format!("failed to open {}: {e}", self.path.display()),
                    });
                    return Step::Empty;
                }
            }
        }
        let Some(file) = self.file.as_mut() else {
            return Step::Done;
        };
        let mut buffer = vec![0u8; READ_SIZE];
        match file.read(&mut buffer) {
            Ok(0) => {
                self.finished = true;
                Step::Done
            }
            Ok(read) => {
                buffer.truncate(read);
                Step::Ready(Chunk::from_vec(buffer))
            }
            Err(e) => {
                self.finished = true;
                ctrl.abort(EngineError::Unspecified {
                    message: format!("failed to read {}: {e}", self.path.display()),
                });
                Step::Empty
            }
        }
    }
}

/// Parses `load <path>`.
pub struct LoadPlugin;

impl OperatorPlugin for LoadPlugin {
    fn name(&self) -> &str {
        "load"
    }

    fn parse(
        &self,
        args: &[&str],
        _registry: &Registry,
    ) -> Result<Vec<Box<dyn Operator>>, EngineError> {
        match args {
            [path] => Ok(vec![Box::new(LoadOperator::new(PathBuf::from(path)))]),
            _ => Err(EngineError::ParseError {
                message: "`load` expects exactly one path".to_string(),
            }),
        }
    }
}
