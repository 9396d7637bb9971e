//! Integration tests for squall

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use arrow::array::{Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use tokio_util::sync::CancellationToken;

use squall::operators::{make_write_operators, CaptureSaver, JsonPrinter};
use squall::{
    parse_pipeline, Catalog, ElementType, EngineConfig, EngineError, EventBatch, ExecCtrl,
    Executor, Input, Instance, Nil, Operator, Registry, Sequence, Step,
};

fn make_batch(values: std::ops::Range<i64>) -> EventBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    let array = Int64Array::from_iter_values(values);
    EventBatch::new(RecordBatch::try_new(schema, vec![Arc::new(array)]).unwrap())
}

fn batch_values(batch: &EventBatch) -> Vec<i64> {
    batch
        .as_record_batch()
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .values()
        .to_vec()
}

fn all_values(batches: &[EventBatch]) -> Vec<i64> {
    batches.iter().flat_map(batch_values).collect()
}

/// A source operator emitting a fixed list of batches.
struct TestSource {
    batches: Vec<EventBatch>,
}

impl fmt::Display for TestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "test-source")
    }
}

impl Operator for TestSource {
    fn name(&self) -> &str {
        "test-source"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::None => Ok(ElementType::Events),
            other => Err(EngineError::TypeMismatch {
                message: format!("`test-source` expects void, got {other}"),
            }),
        }
    }

    fn instantiate(
        &self,
        _input: ElementType,
        _ctrl: &mut ExecCtrl,
    ) -> Result<Instance, EngineError> {
        struct Emitting {
            queue: VecDeque<EventBatch>,
        }
        impl Sequence<Nil, EventBatch> for Emitting {
            fn poll_next(
                &mut self,
                _input: &mut Input<'_, Nil>,
                _ctrl: &mut ExecCtrl,
            ) -> Step<EventBatch> {
                match self.queue.pop_front() {
                    Some(batch) => Step::Ready(batch),
                    None => Step::Done,
                }
            }
        }
        Ok(Instance::SourceEvents(Box::new(Emitting {
            queue: self.batches.clone().into(),
        })))
    }
}

/// A sink operator collecting every batch it receives.
struct TestSink {
    collected: Arc<Mutex<Vec<EventBatch>>>,
}

impl TestSink {
    fn new() -> (Self, Arc<Mutex<Vec<EventBatch>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                collected: Arc::clone(&collected),
            },
            collected,
        )
    }
}

impl fmt::Display for TestSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "test-sink")
    }
}

impl Operator for TestSink {
    fn name(&self) -> &str {
        "test-sink"
    }

    fn infer_output(&self, input: ElementType) -> Result<ElementType, EngineError> {
        match input {
            ElementType::Events => Ok(ElementType::None),
            other => Err(EngineError::TypeMismatch {
                message: format!("`test-sink` expects events, got {other}"),
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
                        self.collected.lock().unwrap().push(batch);
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

fn executor() -> Executor {
    Executor::new(
        Arc::new(Catalog::new()),
        Arc::new(EngineConfig::default()),
        CancellationToken::new(),
    )
}

/// Run `source | <definition> | sink` over the given batches.
async fn run_through(
    definition: &str,
    batches: Vec<EventBatch>,
) -> Result<Vec<EventBatch>, EngineError> {
    let registry = Registry::with_defaults();
    let (sink, collected) = TestSink::new();
    let mut operators: Vec<Box<dyn Operator>> = vec![Box::new(TestSource { batches })];
    operators.extend(parse_pipeline(definition, &registry)?);
    operators.push(Box::new(sink));
    executor().run(operators).await?;
    let collected = collected.lock().unwrap().clone();
    Ok(collected)
}

mod slice_scenarios {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slice_streams_rows_5_to_25() {
        let batches = vec![make_batch(0..10), make_batch(10..20), make_batch(20..30)];
        let out = run_through("slice --begin 5 --end 25", batches).await.unwrap();
        assert_eq!(all_values(&out), (5..25).collect::<Vec<_>>());
        // Batch boundaries survive where possible.
        let sizes: Vec<u64> = out.iter().map(EventBatch::rows).collect();
        assert_eq!(sizes, vec![5, 10, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slice_negative_begin() {
        let batches: Vec<_> = (0..10).map(|i| make_batch(i * 10..(i + 1) * 10)).collect();
        let out = run_through("slice --begin -10", batches).await.unwrap();
        assert_eq!(all_values(&out), (90..100).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slice_negative_begin_and_end() {
        let batches: Vec<_> = (0..10).map(|i| make_batch(i * 10..(i + 1) * 10)).collect();
        let out = run_through("slice --begin -10 --end -5", batches).await.unwrap();
        assert_eq!(all_values(&out), (90..95).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_slice_is_identity() {
        let batches = vec![make_batch(0..10), make_batch(10..20)];
        let out = run_through("slice", batches).await.unwrap();
        assert_eq!(all_values(&out), (0..20).collect::<Vec<_>>());
    }
}

mod conservation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_conserves_order_and_content() {
        let batches: Vec<_> = (0..32).map(|i| make_batch(i * 100..(i + 1) * 100)).collect();
        let (sink, collected) = TestSink::new();
        let operators: Vec<Box<dyn Operator>> =
            vec![Box::new(TestSource { batches }), Box::new(sink)];
        executor().run(operators).await.unwrap();
        assert_eq!(
            all_values(&collected.lock().unwrap()),
            (0..3200).collect::<Vec<_>>()
        );
    }
}

mod write_composites {
    use super::*;

    async fn run_write(joining: bool, batches: Vec<EventBatch>) -> (usize, Vec<u8>) {
        let (saver, data) = CaptureSaver::new(joining);
        let printed =
            make_write_operators(Arc::new(JsonPrinter), Arc::new(saver)).expect("desugar");
        let node_count = printed.len();
        let mut operators: Vec<Box<dyn Operator>> = vec![Box::new(TestSource { batches })];
        operators.extend(printed);
        executor().run(operators).await.expect("pipeline");
        let bytes = data.lock().unwrap().clone();
        (node_count, bytes)
    }

    #[tokio::test(start_paused = true)]
    async fn test_joining_and_fused_forms_produce_identical_bytes() {
        let batches = vec![make_batch(0..2), make_batch(2..4)];
        let (joined_nodes, joined_bytes) = run_write(true, batches.clone()).await;
        let (fused_nodes, fused_bytes) = run_write(false, batches).await;

        // A joining sink expands into `print | save`; a non-joining sink
        // fuses into one node.
        assert_eq!(joined_nodes, 2);
        assert_eq!(fused_nodes, 1);
        assert_eq!(joined_bytes, fused_bytes);
        assert_eq!(
            String::from_utf8(joined_bytes).unwrap(),
            "{\"id\":0}\n{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n"
        );
    }
}

mod byte_streams {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.bin");
        let payload: Vec<u8> = (0..(2u32 << 20)).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(&input)
            .unwrap()
            .write_all(&payload)
            .unwrap();

        let registry = Registry::with_defaults();
        let definition = format!(
            "load {} | save file {}",
            input.display(),
            output.display()
        );
        let operators = parse_pipeline(&definition, &registry).unwrap();
        executor().run(operators).await.unwrap();

        let written = std::fs::read(&output).unwrap();
        assert_eq!(written.len(), payload.len());
        assert_eq!(written, payload, "bytes must arrive complete and in order");
    }
}

mod parse_surface {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unknown_operator_is_a_parse_error() {
        let result = run_through("frobnicate", vec![make_batch(0..1)]).await;
        assert!(matches!(result, Err(EngineError::ParseError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_pipeline_is_rejected() {
        let registry = Registry::with_defaults();
        let operators = parse_pipeline("slice --begin 1", &registry).unwrap();
        let result = executor().run(operators).await;
        // No source, no sink: the chain cannot type-check from `void`.
        assert!(matches!(result, Err(EngineError::TypeMismatch { .. })));
    }
}

mod config_surface {
    use squall::EngineConfig;

    #[test]
    fn test_config_defaults_and_parsing() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert!(!config.allow_unsafe_pipelines);
        assert_eq!(config.console_verbosity, "info");

        let config = EngineConfig::from_yaml("allow_unsafe_pipelines: true").unwrap();
        assert!(config.allow_unsafe_pipelines);
    }
}
