//! Batch primitives: the element kinds that flow through a pipeline.
//!
//! Exactly three element types exist: `None` (no data, the input of sources
//! and the output of sinks), `Events` (schema-tagged row batches), and
//! `Bytes` (refcounted byte chunks). Slicing and splitting are zero-copy:
//! slices share storage with the original.

mod batch;
mod chunk;

pub use batch::EventBatch;
pub use chunk::Chunk;

use std::fmt;

/// The element type of an operator's input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// No data. Sources take this as input, sinks produce it as output.
    None,
    /// Batches of schema-tagged rows.
    Events,
    /// Contiguous byte chunks.
    Bytes,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::None => write!(f, "void"),
            ElementType::Events => write!(f, "events"),
            ElementType::Bytes => write!(f, "bytes"),
        }
    }
}

/// A batch of elements crossing the node boundary.
///
/// Nodes are monomorphized on their element types; this tagged union is the
/// wire format between them. Type-wrong deliveries are rejected with a logic
/// error at the receiving node.
#[derive(Debug, Clone)]
pub enum Elements {
    Events(Vec<EventBatch>),
    Bytes(Vec<Chunk>),
}

impl Elements {
    /// Total size in rows or bytes across all contained elements.
    pub fn total_size(&self) -> u64 {
        match self {
            Elements::Events(batches) => total_size(batches),
            Elements::Bytes(chunks) => total_size(chunks),
        }
    }

    /// The element type tag of this batch.
    pub fn element_type(&self) -> ElementType {
        match self {
            Elements::Events(_) => ElementType::Events,
            Elements::Bytes(_) => ElementType::Bytes,
        }
    }

    /// Number of contained elements.
    pub fn len(&self) -> usize {
        match self {
            Elements::Events(batches) => batches.len(),
            Elements::Bytes(chunks) => chunks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One element kind: the unit held in node buffers.
///
/// `size` reports rows for event batches and bytes for chunks. `split` is
/// zero-copy; both halves share storage with the original.
pub trait Element: Clone + fmt::Debug + Send + 'static {
    /// The element type tag for this kind.
    const TYPE: ElementType;

    /// Size in rows (events) or bytes (chunks).
    fn size(&self) -> u64;

    /// Split into `(prefix_of_at, remainder)`. A partition point of zero
    /// yields an empty prefix; one at or past the size yields an empty
    /// remainder.
    fn split(self, at: u64) -> (Self, Self);

    /// Wrap a batch of this kind into the wire union.
    fn wrap(batch: Vec<Self>) -> Elements;

    /// Unwrap the wire union into this kind, or hand it back on mismatch.
    fn try_from_elements(elements: Elements) -> Result<Vec<Self>, Elements>;
}

impl Element for EventBatch {
    const TYPE: ElementType = ElementType::Events;

    fn size(&self) -> u64 {
        self.rows()
    }

    fn split(self, at: u64) -> (Self, Self) {
        let at = at.min(self.rows());
        let rows = self.rows();
        (self.slice(0, at), self.slice(at, rows))
    }

    fn wrap(batch: Vec<Self>) -> Elements {
        Elements::Events(batch)
    }

    fn try_from_elements(elements: Elements) -> Result<Vec<Self>, Elements> {
        match elements {
            Elements::Events(batches) => Ok(batches),
            other => Err(other),
        }
    }
}

impl Element for Chunk {
    const TYPE: ElementType = ElementType::Bytes;

    fn size(&self) -> u64 {
        self.len()
    }

    fn split(self, at: u64) -> (Self, Self) {
        let at = at.min(self.len());
        let len = self.len();
        (self.slice(0, at), self.slice(at, len))
    }

    fn wrap(batch: Vec<Self>) -> Elements {
        Elements::Bytes(batch)
    }

    fn try_from_elements(elements: Elements) -> Result<Vec<Self>, Elements> {
        match elements {
            Elements::Bytes(chunks) => Ok(chunks),
            other => Err(other),
        }
    }
}

/// The uninhabited element kind standing in for `None`.
///
/// Sources are nodes with `Nil` input and sinks are nodes with `Nil` output;
/// a buffer of `Nil` can never hold an element, so invalid data flow is
/// unrepresentable rather than merely checked.
#[derive(Debug, Clone, Copy)]
pub enum Nil {}

impl Element for Nil {
    const TYPE: ElementType = ElementType::None;

    fn size(&self) -> u64 {
        match *self {}
    }

    fn split(self, _at: u64) -> (Self, Self) {
        match self {}
    }

    fn wrap(batch: Vec<Self>) -> Elements {
        match batch.into_iter().next() {
            Some(nil) => match nil {},
            // An empty batch of nothing is never delivered.
            None => Elements::Events(Vec::new()),
        }
    }

    fn try_from_elements(elements: Elements) -> Result<Vec<Self>, Elements> {
        Err(elements)
    }
}

/// Total size in rows or bytes across a slice of elements.
pub fn total_size<T: Element>(elements: &[T]) -> u64 {
    elements.iter().map(Element::size).sum()
}

/// Split a vector of elements at `at` size units.
///
/// Partitions along element boundaries; the element straddling the partition
/// point is split with the single-element `split`. Zero-size parts are not
/// materialized, so `concat(split(xs, n)) == xs` holds without inserting
/// empties.
pub fn split<T: Element>(elements: Vec<T>, at: u64) -> (Vec<T>, Vec<T>) {
    let mut remaining = at;
    let mut iter = elements.into_iter();
    let mut prefix = Vec::new();
    for element in iter.by_ref() {
        let size = element.size();
        if remaining >= size {
            remaining -= size;
            prefix.push(element);
            if remaining == 0 {
                break;
            }
            continue;
        }
        let (head, tail) = element.split(remaining);
        if head.size() > 0 {
            prefix.push(head);
        }
        let mut rest = Vec::with_capacity(1 + iter.size_hint().0);
        if tail.size() > 0 {
            rest.push(tail);
        }
        rest.extend(iter);
        return (prefix, rest);
    }
    (prefix, iter.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(data: &[u8]) -> Chunk {
        Chunk::new(Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_chunk_split_zero() {
        let (head, tail) = chunk(b"abcdef").split(0);
        assert_eq!(head.len(), 0);
        assert_eq!(tail.as_bytes(), &b"abcdef"[..]);
    }

    #[test]
    fn test_chunk_split_past_end() {
        let (head, tail) = chunk(b"abc").split(10);
        assert_eq!(head.as_bytes(), &b"abc"[..]);
        assert_eq!(tail.len(), 0);
    }

    #[test]
    fn test_chunk_split_round_trip() {
        let original = chunk(b"abcdef");
        for at in 0..=6 {
            let (head, tail) = original.clone().split(at);
            assert_eq!(head.len(), at.min(6));
            let mut joined = head.as_bytes().to_vec();
            joined.extend_from_slice(tail.as_bytes());
            assert_eq!(joined, b"abcdef", "split at {at} must round-trip");
        }
    }

    #[test]
    fn test_vec_split_on_boundary() {
        let chunks = vec![chunk(b"ab"), chunk(b"cd"), chunk(b"ef")];
        let (prefix, rest) = split(chunks, 4);
        assert_eq!(prefix.len(), 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(total_size(&prefix), 4);
        assert_eq!(rest[0].as_bytes(), &b"ef"[..]);
    }

    #[test]
    fn test_vec_split_straddles_element() {
        let chunks = vec![chunk(b"ab"), chunk(b"cdef")];
        let (prefix, rest) = split(chunks, 3);
        assert_eq!(total_size(&prefix), 3);
        assert_eq!(prefix[1].as_bytes(), &b"c"[..]);
        assert_eq!(total_size(&rest), 3);
        assert_eq!(rest[0].as_bytes(), &b"def"[..]);
    }

    #[test]
    fn test_vec_split_zero_and_all() {
        let chunks = vec![chunk(b"ab"), chunk(b"cd")];
        let (prefix, rest) = split(chunks.clone(), 0);
        assert!(prefix.is_empty());
        assert_eq!(total_size(&rest), 4);

        let (prefix, rest) = split(chunks, 100);
        assert_eq!(total_size(&prefix), 4);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_elements_total_size() {
        let elements = Elements::Bytes(vec![chunk(b"abc"), chunk(b"de")]);
        assert_eq!(elements.total_size(), 5);
        assert_eq!(elements.len(), 2);
    }

    #[test]
    fn test_type_display() {
        assert_eq!(ElementType::None.to_string(), "void");
        assert_eq!(ElementType::Events.to_string(), "events");
        assert_eq!(ElementType::Bytes.to_string(), "bytes");
    }
}
