//! The textual pipeline surface.
//!
//! Pipelines are written as `op1 | op2 | … | opN`. This module splits the
//! definition, looks each operator up in the [`Registry`], and lets the
//! operator's plugin parse its own whitespace-separated arguments. A full
//! pipeline language is intentionally out of scope.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::EngineError;
use crate::operator::Operator;
use crate::operators::print::Printer;
use crate::operators::save::Saver;

/// Parses one operator's arguments into (possibly several) operators.
///
/// Composite operators like `write FMT to SINK` expand into more than one.
pub trait OperatorPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn parse(
        &self,
        args: &[&str],
        registry: &Registry,
    ) -> Result<Vec<Box<dyn Operator>>, EngineError>;
}

/// Parses a printer's arguments.
pub trait PrinterPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, args: &[&str]) -> Result<Arc<dyn Printer>, EngineError>;
}

/// Parses a saver's arguments.
pub trait SaverPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, args: &[&str]) -> Result<Arc<dyn Saver>, EngineError>;
}

/// The plugin registry: operators, printers, and savers by name.
#[derive(Default)]
pub struct Registry {
    operators: IndexMap<String, Arc<dyn OperatorPlugin>>,
    printers: IndexMap<String, Arc<dyn PrinterPlugin>>,
    savers: IndexMap<String, Arc<dyn SaverPlugin>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with all built-in plugins.
    pub fn with_defaults() -> Self {
        use crate::operators::load::LoadPlugin;
        use crate::operators::print::JsonPrinterPlugin;
        use crate::operators::save::{
            DiscardSaverPlugin, FileSaverPlugin, SavePlugin, StdoutSaverPlugin,
        };
        use crate::operators::slice::SlicePlugin;
        use crate::operators::write::{ToPlugin, WritePlugin};

        let mut registry = Self::new();
        registry.register_operator(Arc::new(LoadPlugin));
        registry.register_operator(Arc::new(SavePlugin));
        registry.register_operator(Arc::new(SlicePlugin));
        registry.register_operator(Arc::new(WritePlugin));
        registry.register_operator(Arc::new(ToPlugin));
        registry.register_printer(Arc::new(JsonPrinterPlugin));
        registry.register_saver(Arc::new(FileSaverPlugin));
        registry.register_saver(Arc::new(StdoutSaverPlugin));
        registry.register_saver(Arc::new(DiscardSaverPlugin));
        registry
    }

    pub fn register_operator(&mut self, plugin: Arc<dyn OperatorPlugin>) {
        self.operators.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_printer(&mut self, plugin: Arc<dyn PrinterPlugin>) {
        self.printers.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_saver(&mut self, plugin: Arc<dyn SaverPlugin>) {
        self.savers.insert(plugin.name().to_string(), plugin);
    }

    pub fn operator(&self, name: &str) -> Result<&dyn OperatorPlugin, EngineError> {
        self.operators
            .get(name)
            .map(|plugin| plugin.as_ref())
            .ok_or_else(|| EngineError::ParseError {
                message: format!("unknown operator `{name}`"),
            })
    }

    pub fn printer(&self, name: &str) -> Result<&dyn PrinterPlugin, EngineError> {
        self.printers
            .get(name)
            .map(|plugin| plugin.as_ref())
            .ok_or_else(|| EngineError::ParseError {
                message: format!("no `{name}` printer found"),
            })
    }

    pub fn saver(&self, name: &str) -> Result<&dyn SaverPlugin, EngineError> {
        self.savers
            .get(name)
            .map(|plugin| plugin.as_ref())
            .ok_or_else(|| EngineError::ParseError {
                message: format!("no `{name}` saver found"),
            })
    }
}

/// Parse a textual pipeline definition into its operator chain.
pub fn parse_pipeline(
    definition: &str,
    registry: &Registry,
) -> Result<Vec<Box<dyn Operator>>, EngineError> {
    let mut operators = Vec::new();
    for segment in definition.split('|') {
        let tokens: Vec<&str> = segment.split_whitespace().collect();
        let [name, args @ ..] = tokens.as_slice() else {
            return Err(EngineError::ParseError {
                message: "empty operator in pipeline definition".to_string(),
            });
        };
        let plugin = registry.operator(name)?;
        operators.extend(plugin.parse(args, registry)?);
    }
    Ok(operators)
}
