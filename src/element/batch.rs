//! Schema-tagged event batches backed by Arrow record batches.

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

/// A batch of schema-tagged rows.
///
/// Thin wrapper around an Arrow [`RecordBatch`]; slicing is zero-copy and
/// shares the underlying column buffers.
#[derive(Debug, Clone)]
pub struct EventBatch {
    batch: RecordBatch,
}

impl EventBatch {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// An empty batch carrying only a schema.
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            batch: RecordBatch::new_empty(schema),
        }
    }

    /// Number of rows in this batch.
    pub fn rows(&self) -> u64 {
        self.batch.num_rows() as u64
    }

    /// The schema this batch is tagged with.
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Zero-copy slice of the rows in `[begin, end)`, clamped to the batch.
    pub fn slice(&self, begin: u64, end: u64) -> Self {
        let rows = self.rows();
        let begin = begin.min(rows);
        let end = end.clamp(begin, rows);
        Self {
            batch: self.batch.slice(begin as usize, (end - begin) as usize),
        }
    }

    /// Access the underlying Arrow batch.
    pub fn as_record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }
}

impl From<RecordBatch> for EventBatch {
    fn from(batch: RecordBatch) -> Self {
        Self::new(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn make_batch(values: std::ops::Range<i64>) -> EventBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let array = Int64Array::from_iter_values(values);
        EventBatch::new(RecordBatch::try_new(schema, vec![Arc::new(array)]).unwrap())
    }

    fn values(batch: &EventBatch) -> Vec<i64> {
        let column = batch
            .as_record_batch()
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        column.values().to_vec()
    }

    #[test]
    fn test_rows_and_slice() {
        let batch = make_batch(0..10);
        assert_eq!(batch.rows(), 10);

        let sliced = batch.slice(2, 5);
        assert_eq!(sliced.rows(), 3);
        assert_eq!(values(&sliced), vec![2, 3, 4]);
    }

    #[test]
    fn test_slice_clamps() {
        let batch = make_batch(0..4);
        assert_eq!(batch.slice(0, 100).rows(), 4);
        assert_eq!(batch.slice(10, 20).rows(), 0);
        assert_eq!(batch.slice(3, 3).rows(), 0);
    }

    #[test]
    fn test_empty_keeps_schema() {
        let batch = make_batch(0..1);
        let empty = EventBatch::empty(batch.schema());
        assert_eq!(empty.rows(), 0);
        assert_eq!(empty.schema(), batch.schema());
    }
}
