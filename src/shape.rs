//! Shapes: interned key-order layouts for record-like arrays
//!
//! A shape maps a fixed, ordered set of interned text keys to physical slots.
//! Shapes are immutable and canonicalized in a process-wide registry: two
//! record arrays built from the same key insertion order share the identical
//! shape instance (pointer equality), so the key→slot dispatch cost is paid
//! once per distinct key order rather than once per value. Different orderings
//! of the same key set are different shapes.
//!
//! The registry is append-only; entries are never removed. It is bounded by
//! the number of distinct key orders a program actually constructs.

use dashmap::DashMap;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use std::fmt::{self, Debug, Formatter};

use crate::error::ArrayError;
use crate::text::Text;

/// Hard limit on the number of fields a shape can describe.
pub const MAX_SHAPE_FIELDS: usize = 255;

lazy_static! {
    static ref REGISTRY: DashMap<Box<[Text]>, &'static Shape> = DashMap::new();
}

/// An immutable, interned mapping from an ordered key set to storage slots.
///
/// Obtain instances through [`Shape::get_or_create`]; they live for the rest
/// of the process and are shared by every value with the same key order.
pub struct Shape {
    keys: Box<[Text]>,
    slots: HashMap<Text, u8>,
}

impl Shape {
    /// Returns the canonical shape for `keys`, creating it on first use.
    ///
    /// Concurrent callers interning the same key order observe exactly one
    /// winner. Fails only when `keys` exceeds [`MAX_SHAPE_FIELDS`].
    pub fn get_or_create(keys: &[Text]) -> Result<&'static Shape, ArrayError> {
        if keys.len() > MAX_SHAPE_FIELDS {
            return Err(ArrayError::TooManyFields);
        }
        debug_assert!(
            (1..keys.len()).all(|i| !keys[..i].contains(&keys[i])),
            "shape keys must be unique"
        );
        if let Some(existing) = REGISTRY.get(keys) {
            return Ok(*existing);
        }
        let owned: Box<[Text]> = keys.to_vec().into_boxed_slice();
        let shape = *REGISTRY.entry(owned).or_insert_with(|| {
            let slots = keys
                .iter()
                .enumerate()
                .map(|(i, k)| (k.clone(), i as u8))
                .collect();
            Box::leak(Box::new(Shape {
                keys: keys.to_vec().into_boxed_slice(),
                slots,
            }))
        });
        Ok(shape)
    }

    /// Looks up the canonical shape for `keys` without creating it.
    #[must_use]
    pub fn lookup(keys: &[Text]) -> Option<&'static Shape> {
        REGISTRY.get(keys).map(|entry| *entry)
    }

    /// The canonical shape widened by one trailing key.
    pub fn extend(&'static self, key: &Text) -> Result<&'static Shape, ArrayError> {
        debug_assert!(self.slot_of(key).is_none());
        let mut keys = self.keys.to_vec();
        keys.push(key.clone());
        Self::get_or_create(&keys)
    }

    /// Number of fields described by this shape.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key stored at `slot`.
    #[must_use]
    pub fn key_at(&self, slot: usize) -> &Text {
        &self.keys[slot]
    }

    /// The ordered key list.
    #[must_use]
    pub fn keys(&self) -> &[Text] {
        &self.keys
    }

    /// The slot of `key`, if the shape describes it. Interned keys resolve by
    /// identity; plain text falls back to content comparison.
    #[must_use]
    pub fn slot_of(&self, key: &Text) -> Option<usize> {
        self.slots.get(key).map(|&s| s as usize)
    }
}

impl Debug for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<Text> {
        names.iter().map(|n| Text::intern(n)).collect()
    }

    #[test]
    fn same_order_shares_an_instance() {
        let a = Shape::get_or_create(&keys(&["id", "name", "flags"])).unwrap();
        let b = Shape::get_or_create(&keys(&["id", "name", "flags"])).unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn order_matters() {
        let ab = Shape::get_or_create(&keys(&["alpha", "beta"])).unwrap();
        let ba = Shape::get_or_create(&keys(&["beta", "alpha"])).unwrap();
        assert!(!std::ptr::eq(ab, ba));
        assert_eq!(ab.slot_of(&Text::intern("beta")), Some(1));
        assert_eq!(ba.slot_of(&Text::intern("beta")), Some(0));
    }

    #[test]
    fn extend_is_canonical() {
        let base = Shape::get_or_create(&keys(&["x"])).unwrap();
        let wide = base.extend(&Text::intern("y")).unwrap();
        let direct = Shape::get_or_create(&keys(&["x", "y"])).unwrap();
        assert!(std::ptr::eq(wide, direct));
        assert_eq!(wide.key_at(1).as_str(), "y");
    }

    #[test]
    fn field_limit_is_enforced() {
        let many: Vec<Text> = (0..=MAX_SHAPE_FIELDS)
            .map(|i| Text::intern(&format!("field_{i}")))
            .collect();
        assert!(matches!(
            Shape::get_or_create(&many),
            Err(ArrayError::TooManyFields)
        ));
        assert!(Shape::get_or_create(&many[..MAX_SHAPE_FIELDS]).is_ok());
    }

    #[test]
    fn lookup_does_not_create() {
        let ks = keys(&["never", "interned", "order2"]);
        assert!(Shape::lookup(&ks).is_none());
        let s = Shape::get_or_create(&ks).unwrap();
        assert!(std::ptr::eq(Shape::lookup(&ks).unwrap(), s));
    }
}
