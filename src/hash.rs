//! General hash representation
//!
//! The open representation every other one escalates into. Elements live in an
//! insertion-ordered, tombstone-free vector; a separate hash index maps keys to
//! element slots, so lookups are O(1) on average while iteration stays in
//! insertion order. Removal compacts the element vector and repairs the index.

use hashbrown::HashMap;
use std::cmp;

use crate::error::ArrayError;
use crate::key::Key;
use crate::text::Text;
use crate::value::Value;

/// Smallest non-empty element buffer; growth doubles from here.
const SMALL_CAP: usize = 8;

#[derive(Clone)]
pub(crate) struct HashElement {
    pub(crate) key: Key,
    pub(crate) value: Value,
}

#[derive(Clone)]
pub(crate) struct HashArray {
    elems: Vec<HashElement>,
    index: HashMap<Key, usize>,
    /// Next auto-increment key; `None` once the integer key space is
    /// exhausted, at which point `append` fails rather than wrapping.
    next_key: Option<i64>,
}

impl HashArray {
    pub(crate) fn new() -> Self {
        HashArray {
            elems: Vec::new(),
            index: HashMap::new(),
            next_key: Some(0),
        }
    }

    pub(crate) fn with_capacity(cap: usize) -> Self {
        HashArray {
            elems: Vec::with_capacity(cap),
            index: HashMap::with_capacity(cap),
            next_key: Some(0),
        }
    }

    /// Builds the escalated form of a dense array: keys `0..len`.
    pub(crate) fn from_dense(values: &[Value]) -> Self {
        let mut h = Self::with_capacity(values.len());
        for (i, v) in values.iter().enumerate() {
            h.set(Key::Int(i as i64), v.clone());
        }
        h
    }

    /// Builds the escalated form of a record array.
    pub(crate) fn from_record(keys: &[Text], values: &[Value]) -> Self {
        let mut h = Self::with_capacity(keys.len());
        for (k, v) in keys.iter().zip(values) {
            h.set(Key::Text(k.clone()), v.clone());
        }
        h
    }

    pub(crate) fn len(&self) -> usize {
        self.elems.len()
    }

    #[cfg(test)]
    pub(crate) fn next_int_key(&self) -> Option<i64> {
        self.next_key
    }

    fn grow(&mut self, additional: usize) {
        let cap = self.elems.capacity();
        let desired = self.elems.len() + additional;
        if cap >= desired {
            return;
        }
        // Next size class: doubling, from a small first allocation.
        let new_cap = cmp::max(cap * 2, desired.max(SMALL_CAP).next_power_of_two());
        self.elems.reserve_exact(new_cap - self.elems.len());
        self.index.reserve(new_cap - self.index.len());
    }

    fn note_int_key(&mut self, k: i64) {
        if k < 0 {
            return;
        }
        match (k.checked_add(1), self.next_key) {
            (Some(n), Some(cur)) if n > cur => self.next_key = Some(n),
            (None, _) => self.next_key = None,
            _ => {}
        }
    }

    pub(crate) fn position_of(&self, key: &Key) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub(crate) fn exists(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    pub(crate) fn get(&self, key: &Key) -> Option<&Value> {
        self.position_of(key).map(|i| &self.elems[i].value)
    }

    /// Inserts or updates; returns the element's position.
    pub(crate) fn set(&mut self, key: Key, value: Value) -> usize {
        if let Some(&i) = self.index.get(&key) {
            self.elems[i].value = value;
            i
        } else {
            self.grow(1);
            let i = self.elems.len();
            if let Key::Int(k) = key {
                self.note_int_key(k);
            }
            self.index.insert(key.clone(), i);
            self.elems.push(HashElement { key, value });
            i
        }
    }

    /// Mutable slot for `key`, creating it as null if absent. Callers of this
    /// path bypass the copy-on-write envelope and own the consistency burden.
    pub(crate) fn lval_slot(&mut self, key: Key) -> &mut Value {
        let i = match self.index.get(&key) {
            Some(&i) => i,
            None => self.set(key, Value::Null),
        };
        &mut self.elems[i].value
    }

    /// Assigns the next integer key.
    pub(crate) fn append(&mut self, value: Value) -> Result<usize, ArrayError> {
        let k = self.next_key.ok_or(ArrayError::KeyOverflow)?;
        Ok(self.set(Key::Int(k), value))
    }

    /// Removes `key`, returning the position it occupied and its value.
    /// Later elements shift down one position.
    pub(crate) fn remove(&mut self, key: &Key) -> Option<(usize, Value)> {
        let i = self.index.remove(key)?;
        let el = self.elems.remove(i);
        for v in self.index.values_mut() {
            if *v > i {
                *v -= 1;
            }
        }
        Some((i, el.value))
    }

    /// Tail removal. Popping the highest auto-increment key hands the key back
    /// to the counter, mirroring the language's stack semantics.
    pub(crate) fn pop(&mut self) -> Option<Value> {
        let el = self.elems.pop()?;
        self.index.remove(&el.key);
        if let Key::Int(k) = el.key {
            if k >= 0 {
                let was_top = match k.checked_add(1) {
                    Some(n) => self.next_key == Some(n),
                    None => self.next_key.is_none(),
                };
                if was_top {
                    self.next_key = Some(k);
                }
            }
        }
        Some(el.value)
    }

    /// Head removal; integer keys are renumbered from zero afterwards.
    pub(crate) fn dequeue(&mut self) -> Option<Value> {
        if self.elems.is_empty() {
            return None;
        }
        let el = self.elems.remove(0);
        self.index.remove(&el.key);
        self.renumber();
        Some(el.value)
    }

    /// Head insertion with key 0; existing integer keys are renumbered.
    pub(crate) fn prepend(&mut self, value: Value) {
        self.grow(1);
        self.elems.insert(
            0,
            HashElement {
                key: Key::Int(0),
                value,
            },
        );
        self.renumber();
    }

    /// Reassigns integer keys sequentially from 0 in iteration order,
    /// preserving text keys. Used by map-to-list coercions.
    pub(crate) fn renumber(&mut self) {
        let mut next = 0i64;
        for el in &mut self.elems {
            if matches!(el.key, Key::Int(_)) {
                el.key = Key::Int(next);
                next += 1;
            }
        }
        self.rebuild_index();
        self.next_key = Some(next);
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, el) in self.elems.iter().enumerate() {
            self.index.insert(el.key.clone(), i);
        }
    }

    pub(crate) fn element(&self, pos: usize) -> Option<&HashElement> {
        self.elems.get(pos)
    }

    pub(crate) fn elements(&self) -> &[HashElement] {
        &self.elems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_increment_follows_max_key() {
        let mut h = HashArray::new();
        h.set(Key::Int(0), Value::Int(10));
        h.set(Key::Int(2), Value::Int(20));
        h.set(Key::Int(5), Value::Int(50));
        let pos = h.append(Value::Int(60)).unwrap();
        assert_eq!(h.element(pos).unwrap().key, Key::Int(6));
        assert_eq!(h.next_int_key(), Some(7));
    }

    #[test]
    fn negative_keys_do_not_advance_the_counter() {
        let mut h = HashArray::new();
        h.set(Key::Int(-10), Value::Int(1));
        assert_eq!(h.append(Value::Int(2)).unwrap(), 1);
        assert_eq!(h.element(1).unwrap().key, Key::Int(0));
    }

    #[test]
    fn append_fails_once_keys_run_out() {
        let mut h = HashArray::new();
        h.set(Key::Int(i64::MAX), Value::Int(1));
        assert_eq!(h.append(Value::Int(2)), Err(ArrayError::KeyOverflow));
        // The failure is sticky until the top key goes away.
        assert_eq!(h.pop(), Some(Value::Int(1)));
        assert!(h.append(Value::Int(2)).is_ok());
    }

    #[test]
    fn pop_hands_the_key_back() {
        let mut h = HashArray::new();
        h.append(Value::Int(1)).unwrap();
        h.append(Value::Int(2)).unwrap();
        h.pop();
        assert_eq!(h.next_int_key(), Some(1));
        h.append(Value::Int(9)).unwrap();
        assert_eq!(h.element(1).unwrap().key, Key::Int(1));
    }

    #[test]
    fn removal_preserves_order_and_index() {
        let mut h = HashArray::new();
        h.set(Key::from("a"), Value::Int(1));
        h.set(Key::from("b"), Value::Int(2));
        h.set(Key::from("c"), Value::Int(3));
        let (pos, v) = h.remove(&Key::from("b")).unwrap();
        assert_eq!((pos, v), (1, Value::Int(2)));
        assert_eq!(h.element(0).unwrap().key, Key::from("a"));
        assert_eq!(h.element(1).unwrap().key, Key::from("c"));
        assert_eq!(h.get(&Key::from("c")), Some(&Value::Int(3)));
    }

    #[test]
    fn dequeue_renumbers_integer_keys() {
        let mut h = HashArray::new();
        h.append(Value::Int(10)).unwrap();
        h.set(Key::from("k"), Value::Int(20));
        h.append(Value::Int(30)).unwrap();
        assert_eq!(h.dequeue(), Some(Value::Int(10)));
        assert_eq!(h.element(0).unwrap().key, Key::from("k"));
        assert_eq!(h.element(1).unwrap().key, Key::Int(0));
        assert_eq!(h.next_int_key(), Some(1));
    }

    #[test]
    fn prepend_renumbers() {
        let mut h = HashArray::new();
        h.append(Value::Int(1)).unwrap();
        h.append(Value::Int(2)).unwrap();
        h.prepend(Value::Int(0));
        let keys: Vec<_> = h.elements().iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![Key::Int(0), Key::Int(1), Key::Int(2)]);
        assert_eq!(h.element(0).unwrap().value, Value::Int(0));
    }
}
