//! Shaped record representation
//!
//! For maps whose key set is a small, fixed sequence of interned text keys.
//! The key→slot mapping lives in a shared [`Shape`];
//! the value stores only its slot-indexed payloads, sized exactly to the
//! shape. Shapes are canonicalized by key insertion order, so slot order and
//! iteration order coincide.
//!
//! A record never grows a shape in place: adding a key re-points the value at
//! the canonical widened shape (through the copy-on-write envelope one level
//! up); everything else a record cannot express escalates to the hash
//! representation.

use crate::shape::Shape;
use crate::text::Text;
use crate::value::Value;

#[derive(Clone)]
pub(crate) struct RecordArray {
    shape: &'static Shape,
    values: Vec<Value>,
}

impl RecordArray {
    /// A one-field record; the seed every record grows from.
    pub(crate) fn with_first(key: Text, value: Value) -> Self {
        let shape = Shape::get_or_create(std::slice::from_ref(&key))
            .expect("a single field is always within the shape limit");
        RecordArray {
            shape,
            values: vec![value],
        }
    }

    pub(crate) fn shape(&self) -> &'static Shape {
        self.shape
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn get(&self, key: &Text) -> Option<&Value> {
        self.shape.slot_of(key).map(|s| &self.values[s])
    }

    pub(crate) fn slot(&self, slot: usize) -> &Value {
        &self.values[slot]
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut Value {
        &mut self.values[slot]
    }

    pub(crate) fn set_slot(&mut self, slot: usize, value: Value) {
        self.values[slot] = value;
    }

    /// Re-points this record at `shape` (the canonical widening of the current
    /// one) and fills the new trailing slot.
    pub(crate) fn widen(&mut self, shape: &'static Shape, value: Value) {
        debug_assert_eq!(shape.len(), self.shape.len() + 1);
        self.shape = shape;
        self.values.push(value);
    }

    pub(crate) fn keys(&self) -> &[Text] {
        self.shape.keys()
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }
}
