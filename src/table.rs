//! External-table adapter
//!
//! [`ScopeTable`] is a name→boxed-reference table owned and mutated outside
//! the array subsystem (canonically: the top-level variable scope). The
//! adapter representation wraps a shared handle to one and presents it through
//! the array interface with two deliberate differences from every other
//! representation: copy-on-write is suppressed (mutations must be visible
//! through every handle), and the append family is rejected outright (the
//! table has no auto-increment key space).
//!
//! Slots are append-only with tombstones, so an iteration position over the
//! table stays meaningful while other owners mutate it; positions are
//! revalidated before every dereference and stale ones read as invalid.

use hashbrown::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ArrayError;
use crate::key::Key;
use crate::text::Text;
use crate::value::{Value, VarRef};

/// A name→reference table with stable, revalidating cursor positions.
#[derive(Default)]
pub struct ScopeTable {
    /// Append-only; unset entries become tombstones so cursors stay stable.
    slots: Vec<Option<(Text, VarRef)>>,
    index: HashMap<Text, usize>,
    live: usize,
}

impl ScopeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-tombstoned) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[must_use]
    pub fn contains(&self, name: &Text) -> bool {
        self.index.contains_key(name)
    }

    /// The slot bound to `name`, if any.
    #[must_use]
    pub fn lookup(&self, name: &Text) -> Option<VarRef> {
        self.index.get(name).map(|&i| {
            let (_, r) = self.slots[i].as_ref().expect("indexed slot is live");
            r.clone()
        })
    }

    /// The slot bound to `name`, creating a null binding if absent.
    pub fn lookup_or_create(&mut self, name: &Text) -> VarRef {
        if let Some(r) = self.lookup(name) {
            return r;
        }
        let r = VarRef::new(Value::Null);
        self.push_slot(name.clone(), r.clone());
        r
    }

    /// Binds `name` to an existing reference, replacing any current binding.
    pub fn bind(&mut self, name: &Text, r: VarRef) {
        if let Some(&i) = self.index.get(name) {
            self.slots[i] = Some((name.clone(), r));
        } else {
            self.push_slot(name.clone(), r);
        }
    }

    fn push_slot(&mut self, name: Text, r: VarRef) {
        let i = self.slots.len();
        self.slots.push(Some((name.clone(), r)));
        self.index.insert(name, i);
        self.live += 1;
    }

    /// Tombstones `name`'s slot. Cursors pointing at it become invalid; all
    /// other positions are untouched.
    pub fn unset(&mut self, name: &Text) -> bool {
        match self.index.remove(name) {
            Some(i) => {
                self.slots[i] = None;
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    // Cursor surface. A position is a slot index; validity must be re-checked
    // before every dereference because other owners mutate the table.

    #[must_use]
    pub fn slot_valid(&self, pos: usize) -> bool {
        matches!(self.slots.get(pos), Some(Some(_)))
    }

    #[must_use]
    pub fn slot_entry(&self, pos: usize) -> Option<(Text, VarRef)> {
        match self.slots.get(pos) {
            Some(Some((name, r))) => Some((name.clone(), r.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn first_slot(&self) -> Option<usize> {
        self.next_from(0)
    }

    #[must_use]
    pub fn last_slot(&self) -> Option<usize> {
        (0..self.slots.len()).rev().find(|&i| self.slot_valid(i))
    }

    fn next_from(&self, start: usize) -> Option<usize> {
        (start..self.slots.len()).find(|&i| self.slot_valid(i))
    }

    /// The next live slot after `pos`.
    #[must_use]
    pub fn next_slot(&self, pos: usize) -> Option<usize> {
        self.next_from(pos.checked_add(1)?)
    }

    /// The closest live slot before `pos`.
    #[must_use]
    pub fn prev_slot(&self, pos: usize) -> Option<usize> {
        (0..pos.min(self.slots.len())).rev().find(|&i| self.slot_valid(i))
    }
}

/// Shared handle to an externally owned [`ScopeTable`].
pub type SharedScope = Arc<Mutex<ScopeTable>>;

/// Creates a fresh shared scope table.
#[must_use]
pub fn new_shared_scope() -> SharedScope {
    Arc::new(Mutex::new(ScopeTable::new()))
}

/// The adapter representation: an array façade over a [`ScopeTable`].
#[derive(Clone)]
pub(crate) struct TableArray {
    scope: SharedScope,
}

impl TableArray {
    pub(crate) fn new(scope: SharedScope) -> Self {
        TableArray { scope }
    }

    fn lock(&self) -> MutexGuard<'_, ScopeTable> {
        self.scope.lock().expect("scope table lock should succeed")
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&ScopeTable) -> R) -> R {
        f(&self.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn exists(&self, key: &Key) -> bool {
        match key {
            Key::Text(t) => self.lock().contains(t),
            Key::Int(_) => false,
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Value> {
        match key {
            Key::Text(t) => self.lock().lookup(t).map(|r| r.get()),
            Key::Int(_) => None,
        }
    }

    /// Writes through the slot's reference, creating the binding if needed.
    /// Visible through every handle; no copy is ever taken.
    pub(crate) fn set(&self, key: &Key, value: Value) -> Result<(), ArrayError> {
        match key {
            Key::Text(t) => {
                self.lock().lookup_or_create(t).set(value);
                Ok(())
            }
            Key::Int(_) => Err(ArrayError::Unsupported("integer-key set")),
        }
    }

    /// Rebinds the slot to `r` instead of writing through it.
    pub(crate) fn bind(&self, key: &Key, r: VarRef) -> Result<(), ArrayError> {
        match key {
            Key::Text(t) => {
                self.lock().bind(t, r);
                Ok(())
            }
            Key::Int(_) => Err(ArrayError::Unsupported("integer-key binding")),
        }
    }

    pub(crate) fn remove(&self, key: &Key) -> bool {
        match key {
            Key::Text(t) => self.lock().unset(t),
            Key::Int(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Text {
        Text::intern(s)
    }

    #[test]
    fn bindings_alias_through_refs() {
        let mut table = ScopeTable::new();
        let r = table.lookup_or_create(&t("x"));
        r.set(Value::Int(5));
        assert_eq!(table.lookup(&t("x")).unwrap().get(), Value::Int(5));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unset_tombstones_keep_positions_stable() {
        let mut table = ScopeTable::new();
        table.lookup_or_create(&t("a"));
        table.lookup_or_create(&t("b"));
        table.lookup_or_create(&t("c"));
        let b_pos = 1;
        assert!(table.slot_valid(b_pos));
        assert!(table.unset(&t("b")));
        assert!(!table.slot_valid(b_pos));
        // Neighbours keep their positions.
        assert_eq!(table.slot_entry(0).unwrap().0, t("a"));
        assert_eq!(table.slot_entry(2).unwrap().0, t("c"));
        assert_eq!(table.next_slot(0), Some(2));
        assert_eq!(table.prev_slot(2), Some(0));
    }

    #[test]
    fn reinsert_appends_a_new_slot() {
        let mut table = ScopeTable::new();
        table.lookup_or_create(&t("a"));
        table.unset(&t("a"));
        table.lookup_or_create(&t("a"));
        assert!(!table.slot_valid(0));
        assert!(table.slot_valid(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rebinding_replaces_the_reference() {
        let mut table = ScopeTable::new();
        let old = table.lookup_or_create(&t("v"));
        old.set(Value::Int(1));
        let fresh = VarRef::new(Value::Int(2));
        table.bind(&t("v"), fresh.clone());
        assert_eq!(table.lookup(&t("v")).unwrap().get(), Value::Int(2));
        assert!(!table.lookup(&t("v")).unwrap().ptr_eq(&old));
    }
}
