//! squall: a streaming security-telemetry pipeline engine.
//!
//! Pipelines are typed chains of operators over row-batched events and raw
//! byte chunks, written as `source | transformation | … | sink`. Each
//! operator runs in its own execution node with pull-based demand between
//! adjacent nodes, bounded buffering, and a diagnostic bus that converges
//! the whole pipeline on the first error.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use squall::{parse_pipeline, Catalog, EngineConfig, Executor, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), squall::EngineError> {
//!     let registry = Registry::with_defaults();
//!     let operators = parse_pipeline("load in.bin | save file out.bin", &registry)?;
//!     let executor = Executor::new(
//!         Arc::new(Catalog::new()),
//!         Arc::new(EngineConfig::default()),
//!         CancellationToken::new(),
//!     );
//!     executor.run(operators).await
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod diagnostic;
pub mod element;
pub mod error;
pub mod exec;
pub mod metrics;
pub mod operator;
pub mod operators;
pub mod parse;
pub mod signal;

// Re-export main types
pub use catalog::Catalog;
pub use config::EngineConfig;
pub use diagnostic::{Diagnostic, DiagnosticBus, DiagnosticHandle, Severity};
pub use element::{Chunk, Element, ElementType, Elements, EventBatch, Nil};
pub use error::{ConfigError, EngineError};
pub use exec::{Executor, ExitReason, NodeHandle};
pub use operator::{
    EventOrder, ExecCtrl, Input, Instance, Location, Operator, Optimized, Sequence, Step,
};
pub use parse::{parse_pipeline, Registry};
pub use signal::shutdown_signal;
