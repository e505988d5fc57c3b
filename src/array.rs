//! The polymorphic array value
//!
//! [`Array`] is a reference-counted handle to an array body. The body carries
//! one of four physical representations:
//!
//! - **dense**: keys are exactly the contiguous integers `0..len`;
//! - **hash**: arbitrary integer/text keys with an insertion-ordered element
//!   vector and a hash index — the representation everything else escalates
//!   into;
//! - **record**: a fixed set of interned text keys whose key→slot mapping is
//!   factored into a shared, interned [`Shape`];
//! - **table**: a façade over an externally owned
//!   [`ScopeTable`](crate::ScopeTable) (copy-on-write suppressed, append
//!   rejected).
//!
//! Mutating methods compute a copy flag from the live count: a shared body is
//! never mutated in place, the handle first adopts a private copy
//! (copy-on-write) or a more general replacement (escalation). Callers never
//! see stale instances; the handle swaps itself whenever an operation is
//! satisfied by a different body.
//!
//! Iteration is positional and always visits elements in insertion order,
//! regardless of physical slot placement. Strong iterators are cursors
//! registered against a specific body; structural mutation redirects them
//! synchronously instead of invalidating them.

use lazy_static::lazy_static;
use std::fmt::{self, Debug, Formatter};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::Relaxed};
use std::sync::{Mutex, MutexGuard};

use crate::dense::DenseArray;
use crate::error::ArrayError;
use crate::hash::HashArray;
use crate::key::Key;
use crate::record::RecordArray;
use crate::shape::Shape;
use crate::table::{SharedScope, TableArray};
use crate::value::{Value, VarRef};
use crate::STATIC_RC;

/// An opaque iteration position. For the in-memory representations this is a
/// logical index; for the table adapter it is a table cursor that must be
/// revalidated before every dereference.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Pos(u64);

impl Pos {
    /// The "no position" sentinel.
    pub const INVALID: Pos = Pos(u64::MAX);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    fn index(self) -> Option<usize> {
        self.is_valid().then(|| self.0 as usize)
    }
}

/// Identifies a registered strong iterator.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StrongId(u64);

/// The two array-union operators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MergeOp {
    /// Union keeping existing entries (`+`).
    Plus,
    /// Concatenation: integer keys are appended fresh, text keys overwrite.
    Merge,
}

/// Which physical representation currently backs an [`Array`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArrayKind {
    Dense,
    Hash,
    Record,
    Table,
}

#[derive(Clone)]
pub(crate) enum Repr {
    Dense(DenseArray),
    Hash(HashArray),
    Record(RecordArray),
    Table(TableArray),
}

struct StrongSlot {
    id: u64,
    pos: u64,
}

pub(crate) struct ArrayBody {
    rc: AtomicU32,
    /// The internal iteration cursor, as a raw position.
    cursor: AtomicU64,
    /// Strong iterators registered against this body.
    strong: Mutex<Vec<StrongSlot>>,
    repr: Repr,
}

lazy_static! {
    /// The canonical empty array: immutable, pinned for the life of the
    /// process, handed out instead of allocating fresh empty arrays.
    static ref EMPTY: Array = {
        let a = Array::from_parts(Repr::Dense(DenseArray::new()));
        a.body().rc.store(STATIC_RC, Relaxed);
        a
    };
}

static NEXT_STRONG: AtomicU64 = AtomicU64::new(1);

/// A reference-counted handle to a polymorphic ordered array.
pub struct Array {
    ptr: NonNull<ArrayBody>,
}

// Safety: the body is reached only through counted handles; its mutable parts
// are atomic or lock-guarded, and representation mutation requires the sole
// handle.
unsafe impl Send for Array {}
unsafe impl Sync for Array {}

impl Array {
    /// Returns the canonical empty array. Does not allocate.
    #[must_use]
    pub fn new() -> Self {
        EMPTY.clone()
    }

    /// Wraps an externally owned scope table in the adapter representation.
    #[must_use]
    pub fn for_scope(scope: SharedScope) -> Self {
        Array::from_parts(Repr::Table(TableArray::new(scope)))
    }

    pub(crate) fn from_parts(repr: Repr) -> Self {
        let body = Box::new(ArrayBody {
            rc: AtomicU32::new(1),
            cursor: AtomicU64::new(0),
            strong: Mutex::new(Vec::new()),
            repr,
        });
        Array {
            // Safety: `Box::into_raw` never returns null
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(body)) },
        }
    }

    fn body(&self) -> &ArrayBody {
        // Safety: the body lives for as long as any handle does
        unsafe { self.ptr.as_ref() }
    }

    fn repr(&self) -> &Repr {
        &self.body().repr
    }

    fn repr_mut(&mut self) -> &mut Repr {
        debug_assert_eq!(self.refcount(), 1, "mutation requires exclusive ownership");
        // Safety: sole handle, checked above
        unsafe { &mut self.ptr.as_mut().repr }
    }

    fn strong_slots(&self) -> MutexGuard<'_, Vec<StrongSlot>> {
        self.body()
            .strong
            .lock()
            .expect("strong iterator lock should succeed")
    }

    /// Number of live handles to this body; the static sentinel for the
    /// canonical empty array.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.body().rc.load(Relaxed)
    }

    /// `true` when mutating through this handle would be observable through
    /// another one, i.e. a mutation must copy first.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.refcount() != 1
    }

    /// Whether copy-on-write is suppressed (the table adapter).
    #[must_use]
    pub fn no_cow(&self) -> bool {
        matches!(self.repr(), Repr::Table(_))
    }

    /// Whether two handles refer to the same body.
    #[must_use]
    pub fn ptr_eq(&self, other: &Array) -> bool {
        self.ptr == other.ptr
    }

    #[must_use]
    pub fn kind(&self) -> ArrayKind {
        match self.repr() {
            Repr::Dense(_) => ArrayKind::Dense,
            Repr::Hash(_) => ArrayKind::Hash,
            Repr::Record(_) => ArrayKind::Record,
            Repr::Table(_) => ArrayKind::Table,
        }
    }

    /// The shape backing this array, when it is record-shaped.
    #[must_use]
    pub fn shape(&self) -> Option<&'static Shape> {
        match self.repr() {
            Repr::Record(r) => Some(r.shape()),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self.repr() {
            Repr::Dense(d) => d.len(),
            Repr::Hash(h) => h.len(),
            Repr::Record(r) => r.len(),
            Repr::Table(t) => t.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical copy: preserves key order, values (re-referencing counted
    /// payloads, not deep-cloning them) and the cursor. Strong iterators stay
    /// with the source body. The adapter copies as another handle to the same
    /// table.
    #[must_use]
    pub fn copy(&self) -> Array {
        if self.no_cow() {
            return self.clone();
        }
        let new = Array::from_parts(self.repr().clone());
        new.body()
            .cursor
            .store(self.body().cursor.load(Relaxed), Relaxed);
        new
    }

    /// Ensures this handle exclusively owns its body, adopting a private copy
    /// first when it is shared. No-op for the adapter.
    fn separate(&mut self) {
        if self.no_cow() {
            return;
        }
        if self.is_shared() {
            *self = self.copy();
        }
    }

    /// Swaps in a replacement representation, carrying over the cursor and —
    /// when this handle owned its body — the registered strong iterators.
    fn replace_repr(&mut self, repr: Repr) {
        let cursor = self.body().cursor.load(Relaxed);
        let strong = if self.is_shared() {
            Vec::new()
        } else {
            std::mem::take(&mut *self.strong_slots())
        };
        let new = Array::from_parts(repr);
        new.body().cursor.store(cursor, Relaxed);
        *new.strong_slots() = strong;
        *self = new;
    }

    fn hash_of(&self) -> HashArray {
        match self.repr() {
            Repr::Dense(d) => HashArray::from_dense(d.values()),
            Repr::Record(r) => HashArray::from_record(r.keys(), r.values()),
            Repr::Hash(h) => h.clone(),
            Repr::Table(_) => unreachable!("the adapter never escalates"),
        }
    }

    /// Promotes a dense or record body to the hash representation, carrying
    /// element order, the cursor and any strong iterators. Idempotent on hash
    /// and table bodies.
    fn ensure_hash(&mut self) {
        match self.kind() {
            ArrayKind::Hash | ArrayKind::Table => {}
            from => {
                tracing::trace!(target: "varray", ?from, "escalating to the hash representation");
                let h = self.hash_of();
                self.replace_repr(Repr::Hash(h));
            }
        }
    }

    /// Escalates if this representation cannot support safe external mutation
    /// during iteration. The hash representation redirects its iterators and
    /// the adapter revalidates its cursors, so both are returned unchanged.
    pub fn escalate(&mut self, mutable_iteration: bool) {
        if mutable_iteration {
            if let ArrayKind::Dense | ArrayKind::Record = self.kind() {
                self.ensure_hash();
            }
        }
    }

    fn adopt_empty(&mut self) {
        *self = Array::new();
    }

    // ---- reads ----------------------------------------------------------

    fn exists_key(&self, key: &Key) -> bool {
        match self.repr() {
            Repr::Dense(d) => key
                .as_int()
                .map_or(false, |i| i >= 0 && (i as usize) < d.len()),
            Repr::Hash(h) => h.exists(key),
            Repr::Record(r) => key
                .as_text()
                .map_or(false, |t| r.shape().slot_of(t).is_some()),
            Repr::Table(t) => t.exists(key),
        }
    }

    #[must_use]
    pub fn exists(&self, key: impl Into<Key>) -> bool {
        self.exists_key(&key.into())
    }

    fn get_key(&self, key: &Key) -> Option<Value> {
        match self.repr() {
            Repr::Dense(d) => key
                .as_int()
                .filter(|&i| i >= 0)
                .and_then(|i| d.get(i as usize).cloned()),
            Repr::Hash(h) => h.get(key).cloned(),
            Repr::Record(r) => key.as_text().and_then(|t| r.get(t).cloned()),
            Repr::Table(t) => t.get(key),
        }
    }

    #[must_use]
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.get_key(&key.into())
    }

    /// Like [`Array::get`], but a missing key reads as null after emitting a
    /// diagnostic notice. Never fatal.
    #[must_use]
    pub fn get_or_notice(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        match self.get_key(&key) {
            Some(v) => v,
            None => {
                tracing::warn!(target: "varray", key = %key, "undefined array key");
                Value::Null
            }
        }
    }

    // ---- writes ---------------------------------------------------------

    /// Stores `value` under `key`, creating it if absent.
    ///
    /// Keys a representation cannot express escalate it: a gap or text key on
    /// a non-empty dense body, an integer or unknown key on a record. Setting
    /// a new interned text key on a record transitions it to the canonical
    /// widened shape instead.
    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), ArrayError> {
        let key = key.into();
        let value = value.into();
        match self.set_plan(&key) {
            SetPlan::Table => {
                let Repr::Table(t) = self.repr() else {
                    unreachable!()
                };
                t.set(&key, value)
            }
            SetPlan::DenseInPlace(i) => {
                self.separate();
                let Repr::Dense(d) = self.repr_mut() else {
                    unreachable!()
                };
                d.set(i, value);
                Ok(())
            }
            SetPlan::DenseAppend => {
                self.separate();
                let Repr::Dense(d) = self.repr_mut() else {
                    unreachable!()
                };
                d.push(value);
                Ok(())
            }
            SetPlan::FreshRecord => {
                let Key::Text(t) = key else { unreachable!() };
                self.replace_repr(Repr::Record(RecordArray::with_first(t, value)));
                Ok(())
            }
            SetPlan::FreshHash => {
                let mut h = HashArray::new();
                h.set(key, value);
                self.replace_repr(Repr::Hash(h));
                Ok(())
            }
            SetPlan::Hash => {
                self.separate();
                let Repr::Hash(h) = self.repr_mut() else {
                    unreachable!()
                };
                h.set(key, value);
                Ok(())
            }
            SetPlan::RecordInPlace(slot) => {
                self.separate();
                let Repr::Record(r) = self.repr_mut() else {
                    unreachable!()
                };
                r.set_slot(slot, value);
                Ok(())
            }
            SetPlan::RecordWiden(shape) => {
                self.separate();
                let Repr::Record(r) = self.repr_mut() else {
                    unreachable!()
                };
                r.widen(shape, value);
                Ok(())
            }
            SetPlan::Escalate => {
                self.ensure_hash();
                self.separate();
                let Repr::Hash(h) = self.repr_mut() else {
                    unreachable!()
                };
                h.set(key, value);
                Ok(())
            }
        }
    }

    fn set_plan(&self, key: &Key) -> SetPlan {
        match self.repr() {
            Repr::Table(_) => SetPlan::Table,
            Repr::Hash(_) => SetPlan::Hash,
            Repr::Dense(d) => match key {
                Key::Int(i) if *i >= 0 && (*i as usize) < d.len() => {
                    SetPlan::DenseInPlace(*i as usize)
                }
                Key::Int(i) if *i >= 0 && (*i as usize) == d.len() => SetPlan::DenseAppend,
                Key::Text(t) if d.is_empty() => {
                    if t.is_interned() {
                        SetPlan::FreshRecord
                    } else {
                        SetPlan::FreshHash
                    }
                }
                _ => SetPlan::Escalate,
            },
            Repr::Record(r) => match key {
                Key::Text(t) => match r.shape().slot_of(t) {
                    Some(slot) => SetPlan::RecordInPlace(slot),
                    None if t.is_interned() => match r.shape().extend(t) {
                        Ok(shape) => SetPlan::RecordWiden(shape),
                        Err(_) => SetPlan::Escalate,
                    },
                    None => SetPlan::Escalate,
                },
                Key::Int(_) => SetPlan::Escalate,
            },
        }
    }

    /// Binds a shared reference under `key` instead of storing a value copy.
    /// On the adapter this rebinds the table slot.
    pub fn set_ref(&mut self, key: impl Into<Key>, r: VarRef) -> Result<(), ArrayError> {
        let key = key.into();
        if let Repr::Table(t) = self.repr() {
            return t.bind(&key, r);
        }
        self.set(key, Value::Ref(r))
    }

    /// A mutable slot for `key`, creating it as null if absent. The handle is
    /// separated (and possibly escalated) first, so the returned slot is
    /// exclusively owned.
    pub fn lval(&mut self, key: impl Into<Key>) -> Result<&mut Value, ArrayError> {
        let key = key.into();
        if self.no_cow() {
            return Err(ArrayError::Unsupported("in-place slot access"));
        }
        if self.exists_key(&key) {
            self.separate();
        } else {
            self.set(key.clone(), Value::Null)?;
        }
        match self.repr_mut() {
            Repr::Dense(d) => {
                let i = key.as_int().expect("dense keys are integers") as usize;
                Ok(d.get_mut(i).expect("slot was just ensured"))
            }
            Repr::Hash(h) => Ok(h.lval_slot(key)),
            Repr::Record(r) => {
                let t = key.as_text().expect("record keys are text");
                let slot = r.shape().slot_of(t).expect("slot was just ensured");
                Ok(r.slot_mut(slot))
            }
            Repr::Table(_) => unreachable!("rejected above"),
        }
    }

    /// Removes `key`. Returns whether it existed. A removal the current
    /// representation cannot express (a gap in a dense body, any record
    /// field) escalates first; strong iterators referencing the removed
    /// element are redirected to its successor.
    pub fn remove(&mut self, key: impl Into<Key>) -> bool {
        let key = key.into();
        let plan = match self.repr() {
            Repr::Table(_) => RemovePlan::Table,
            Repr::Dense(d) => match key.as_int() {
                Some(i) if i >= 0 && (i as usize) < d.len() => {
                    if (i as usize) == d.len() - 1 {
                        RemovePlan::DenseLast
                    } else {
                        RemovePlan::Hash
                    }
                }
                _ => RemovePlan::Miss,
            },
            Repr::Record(r) => match key.as_text() {
                // Shrinking a shape is not representable; always escalate.
                Some(t) if r.shape().slot_of(t).is_some() => RemovePlan::Hash,
                _ => RemovePlan::Miss,
            },
            Repr::Hash(h) => {
                if h.exists(&key) {
                    RemovePlan::Hash
                } else {
                    RemovePlan::Miss
                }
            }
        };
        match plan {
            RemovePlan::Table => {
                let Repr::Table(t) = self.repr() else {
                    unreachable!()
                };
                t.remove(&key)
            }
            RemovePlan::Miss => false,
            RemovePlan::DenseLast => {
                self.separate();
                let at = {
                    let Repr::Dense(d) = self.repr_mut() else {
                        unreachable!()
                    };
                    d.pop();
                    d.len()
                };
                self.notify_removed(at);
                true
            }
            RemovePlan::Hash => {
                self.ensure_hash();
                self.separate();
                let removed = {
                    let Repr::Hash(h) = self.repr_mut() else {
                        unreachable!()
                    };
                    h.remove(&key)
                };
                match removed {
                    Some((at, _)) => {
                        self.notify_removed(at);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Appends `value` under the next integer key. Fails on the adapter and
    /// when the integer key space is exhausted.
    pub fn append(&mut self, value: impl Into<Value>) -> Result<(), ArrayError> {
        let value = value.into();
        match self.kind() {
            ArrayKind::Table => Err(ArrayError::Unsupported("append")),
            ArrayKind::Dense => {
                self.separate();
                let Repr::Dense(d) = self.repr_mut() else {
                    unreachable!()
                };
                d.push(value);
                Ok(())
            }
            ArrayKind::Record | ArrayKind::Hash => {
                self.ensure_hash();
                self.separate();
                let Repr::Hash(h) = self.repr_mut() else {
                    unreachable!()
                };
                h.append(value).map(|_| ())
            }
        }
    }

    /// Appends an existing shared reference.
    pub fn append_ref(&mut self, r: VarRef) -> Result<(), ArrayError> {
        self.append(Value::Ref(r))
    }

    /// Appends a fresh null binding and returns it, for callers that want to
    /// write through the slot afterwards.
    pub fn append_new_ref(&mut self) -> Result<VarRef, ArrayError> {
        let r = VarRef::new(Value::Null);
        self.append_ref(r.clone())?;
        Ok(r)
    }

    /// Removes and returns the last element; the cursor resets to the first
    /// element. Popping the last remaining element adopts the canonical empty
    /// array.
    pub fn pop(&mut self) -> Result<Option<Value>, ArrayError> {
        match self.kind() {
            ArrayKind::Table => return Err(ArrayError::Unsupported("pop")),
            ArrayKind::Record => self.ensure_hash(),
            _ => {}
        }
        if self.is_empty() {
            return Ok(None);
        }
        self.separate();
        let (value, at) = match self.repr_mut() {
            Repr::Dense(d) => {
                let v = d.pop();
                (v, d.len())
            }
            Repr::Hash(h) => {
                let v = h.pop();
                (v, h.len())
            }
            _ => unreachable!(),
        };
        self.notify_removed(at);
        self.reset_cursor_first();
        if self.is_empty() {
            self.adopt_empty();
        }
        Ok(value)
    }

    /// Removes and returns the first element; integer keys are renumbered
    /// from zero and the cursor resets. Emptying the array adopts the
    /// canonical empty array.
    pub fn dequeue(&mut self) -> Result<Option<Value>, ArrayError> {
        match self.kind() {
            ArrayKind::Table => return Err(ArrayError::Unsupported("dequeue")),
            ArrayKind::Record => self.ensure_hash(),
            _ => {}
        }
        if self.is_empty() {
            return Ok(None);
        }
        self.separate();
        let value = match self.repr_mut() {
            Repr::Dense(d) => d.remove_first(),
            Repr::Hash(h) => h.dequeue(),
            _ => unreachable!(),
        };
        self.notify_removed(0);
        self.reset_cursor_first();
        if self.is_empty() {
            self.adopt_empty();
        }
        Ok(value)
    }

    /// Inserts `value` at the head under key 0, renumbering existing integer
    /// keys; the cursor resets to the first element.
    pub fn prepend(&mut self, value: impl Into<Value>) -> Result<(), ArrayError> {
        let value = value.into();
        match self.kind() {
            ArrayKind::Table => return Err(ArrayError::Unsupported("prepend")),
            ArrayKind::Record => self.ensure_hash(),
            _ => {}
        }
        self.separate();
        match self.repr_mut() {
            Repr::Dense(d) => d.insert_first(value),
            Repr::Hash(h) => h.prepend(value),
            _ => unreachable!(),
        }
        self.notify_prepended();
        self.reset_cursor_first();
        Ok(())
    }

    /// Applies an array-union operator with `other`'s elements.
    pub fn merge(&mut self, other: &Array, op: MergeOp) -> Result<(), ArrayError> {
        if self.no_cow() {
            return Err(ArrayError::Unsupported("merge"));
        }
        if self.kind() == ArrayKind::Dense && other.kind() == ArrayKind::Dense {
            let other_vals: Vec<Value> = {
                let Repr::Dense(d) = other.repr() else {
                    unreachable!()
                };
                d.values().to_vec()
            };
            self.separate();
            let Repr::Dense(d) = self.repr_mut() else {
                unreachable!()
            };
            match op {
                MergeOp::Merge => {
                    for v in other_vals {
                        d.push(v);
                    }
                }
                MergeOp::Plus => {
                    let len = d.len();
                    for v in other_vals.into_iter().skip(len) {
                        d.push(v);
                    }
                }
            }
            return Ok(());
        }
        let entries = other.entries();
        self.ensure_hash();
        self.separate();
        let Repr::Hash(h) = self.repr_mut() else {
            unreachable!()
        };
        for (k, v) in entries {
            match op {
                MergeOp::Plus => {
                    if !h.exists(&k) {
                        h.set(k, v);
                    }
                }
                MergeOp::Merge => match k {
                    Key::Int(_) => {
                        h.append(v)?;
                    }
                    Key::Text(_) => {
                        h.set(k, v);
                    }
                },
            }
        }
        Ok(())
    }

    /// Reindexes integer keys from zero in iteration order, preserving text
    /// keys (map-to-list coercion).
    pub fn renumber(&mut self) -> Result<(), ArrayError> {
        match self.kind() {
            ArrayKind::Table => Err(ArrayError::Unsupported("renumber")),
            // Dense keys are already 0..len; records have no integer keys.
            ArrayKind::Dense | ArrayKind::Record => Ok(()),
            ArrayKind::Hash => {
                self.separate();
                let Repr::Hash(h) = self.repr_mut() else {
                    unreachable!()
                };
                h.renumber();
                Ok(())
            }
        }
    }

    // ---- positional iteration -------------------------------------------

    /// Position of the first element, or invalid when empty.
    #[must_use]
    pub fn iter_begin(&self) -> Pos {
        match self.repr() {
            Repr::Table(t) => t
                .with(|s| s.first_slot())
                .map_or(Pos::INVALID, |i| Pos(i as u64)),
            _ => {
                if self.is_empty() {
                    Pos::INVALID
                } else {
                    Pos(0)
                }
            }
        }
    }

    /// Position of the last element, or invalid when empty.
    #[must_use]
    pub fn iter_end(&self) -> Pos {
        match self.repr() {
            Repr::Table(t) => t
                .with(|s| s.last_slot())
                .map_or(Pos::INVALID, |i| Pos(i as u64)),
            _ => {
                let n = self.len();
                if n == 0 {
                    Pos::INVALID
                } else {
                    Pos(n as u64 - 1)
                }
            }
        }
    }

    /// The position after `pos`, or invalid past the end.
    #[must_use]
    pub fn iter_advance(&self, pos: Pos) -> Pos {
        let Some(i) = pos.index() else {
            return Pos::INVALID;
        };
        match self.repr() {
            Repr::Table(t) => t
                .with(|s| s.next_slot(i))
                .map_or(Pos::INVALID, |n| Pos(n as u64)),
            _ => {
                if i + 1 < self.len() {
                    Pos(i as u64 + 1)
                } else {
                    Pos::INVALID
                }
            }
        }
    }

    /// The position before `pos`, or invalid before the start.
    #[must_use]
    pub fn iter_rewind(&self, pos: Pos) -> Pos {
        let Some(i) = pos.index() else {
            return Pos::INVALID;
        };
        match self.repr() {
            Repr::Table(t) => t
                .with(|s| s.prev_slot(i))
                .map_or(Pos::INVALID, |p| Pos(p as u64)),
            _ => {
                if i == 0 || i > self.len() {
                    Pos::INVALID
                } else {
                    Pos(i as u64 - 1)
                }
            }
        }
    }

    fn key_of(&self, pos: Pos) -> Option<Key> {
        let i = pos.index()?;
        match self.repr() {
            Repr::Dense(d) => (i < d.len()).then(|| Key::Int(i as i64)),
            Repr::Hash(h) => h.element(i).map(|e| e.key.clone()),
            Repr::Record(r) => (i < r.len()).then(|| Key::Text(r.keys()[i].clone())),
            Repr::Table(t) => t.with(|s| s.slot_entry(i)).map(|(name, _)| Key::Text(name)),
        }
    }

    /// The key at `pos`. Adapter positions are revalidated: a stale position
    /// reads as `None`.
    #[must_use]
    pub fn key_at(&self, pos: Pos) -> Option<Value> {
        self.key_of(pos).map(|k| k.to_value())
    }

    /// The value at `pos`, with the same revalidation rule as
    /// [`Array::key_at`].
    #[must_use]
    pub fn value_at(&self, pos: Pos) -> Option<Value> {
        let i = pos.index()?;
        match self.repr() {
            Repr::Dense(d) => d.get(i).cloned(),
            Repr::Hash(h) => h.element(i).map(|e| e.value.clone()),
            Repr::Record(r) => (i < r.len()).then(|| r.slot(i).clone()),
            Repr::Table(t) => t.with(|s| s.slot_entry(i)).map(|(_, r)| r.get()),
        }
    }

    #[must_use]
    pub fn pair_at(&self, pos: Pos) -> Option<(Value, Value)> {
        Some((self.key_at(pos)?, self.value_at(pos)?))
    }

    fn entries(&self) -> Vec<(Key, Value)> {
        let mut out = Vec::with_capacity(self.len());
        let mut p = self.iter_begin();
        while p.is_valid() {
            if let (Some(k), Some(v)) = (self.key_of(p), self.value_at(p)) {
                out.push((k, v));
            }
            p = self.iter_advance(p);
        }
        out
    }

    /// Iterates `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> Entries<'_> {
        Entries {
            arr: self,
            pos: self.iter_begin(),
        }
    }

    // ---- the internal cursor --------------------------------------------

    fn load_cursor(&self) -> Pos {
        Pos(self.body().cursor.load(Relaxed))
    }

    fn store_cursor(&self, pos: Pos) {
        self.body().cursor.store(pos.0, Relaxed);
    }

    fn reset_cursor_first(&self) {
        let p = self.iter_begin();
        self.store_cursor(p);
    }

    /// The element under the internal cursor.
    #[must_use]
    pub fn cursor_current(&self) -> Option<(Value, Value)> {
        self.pair_at(self.load_cursor())
    }

    /// Moves the cursor to the first element and returns it.
    pub fn cursor_reset(&mut self) -> Option<(Value, Value)> {
        self.separate();
        let p = self.iter_begin();
        self.store_cursor(p);
        self.pair_at(p)
    }

    /// Moves the cursor to the last element and returns it.
    pub fn cursor_end(&mut self) -> Option<(Value, Value)> {
        self.separate();
        let p = self.iter_end();
        self.store_cursor(p);
        self.pair_at(p)
    }

    /// Advances the cursor and returns the element it lands on.
    pub fn cursor_advance(&mut self) -> Option<(Value, Value)> {
        self.separate();
        let p = self.iter_advance(self.load_cursor());
        self.store_cursor(p);
        self.pair_at(p)
    }

    /// Steps the cursor backwards and returns the element it lands on.
    pub fn cursor_rewind(&mut self) -> Option<(Value, Value)> {
        self.separate();
        let p = self.iter_rewind(self.load_cursor());
        self.store_cursor(p);
        self.pair_at(p)
    }

    // ---- strong iterators -----------------------------------------------

    /// Registers a strong iterator at the first element. The array is
    /// separated and, if its representation cannot support mutation during
    /// iteration, escalated first.
    pub fn strong_begin(&mut self) -> StrongId {
        self.escalate(true);
        self.separate();
        let id = NEXT_STRONG.fetch_add(1, Relaxed);
        let pos = self.iter_begin();
        self.strong_slots().push(StrongSlot { id, pos: pos.0 });
        StrongId(id)
    }

    fn strong_pos(&self, id: StrongId) -> Option<Pos> {
        self.strong_slots()
            .iter()
            .find(|s| s.id == id.0)
            .map(|s| Pos(s.pos))
    }

    /// The element a registered iterator currently references.
    #[must_use]
    pub fn strong_current(&self, id: StrongId) -> Option<(Value, Value)> {
        self.pair_at(self.strong_pos(id)?)
    }

    /// Advances a registered iterator and returns the element it lands on.
    pub fn strong_advance(&self, id: StrongId) -> Option<(Value, Value)> {
        let cur = self.strong_pos(id)?;
        let next = self.iter_advance(cur);
        if let Some(s) = self.strong_slots().iter_mut().find(|s| s.id == id.0) {
            s.pos = next.0;
        }
        self.pair_at(next)
    }

    /// Unregisters a strong iterator.
    pub fn strong_release(&self, id: StrongId) {
        self.strong_slots().retain(|s| s.id != id.0);
    }

    /// Walks registered iterators (and the cursor) after removing the element
    /// at logical position `at`: an iterator on the removed element is
    /// redirected to its successor, later iterators follow their elements
    /// down one position. This happens unconditionally as part of every
    /// removing operation.
    fn notify_removed(&mut self, at: usize) {
        let new_len = self.len() as u64;
        let at = at as u64;
        {
            let mut slots = self.strong_slots();
            for s in slots.iter_mut() {
                if s.pos == u64::MAX {
                    continue;
                }
                if s.pos == at {
                    if at >= new_len {
                        s.pos = u64::MAX;
                    }
                } else if s.pos > at {
                    s.pos -= 1;
                }
            }
        }
        let c = self.body().cursor.load(Relaxed);
        if c != u64::MAX {
            if c == at {
                if at >= new_len {
                    self.body().cursor.store(u64::MAX, Relaxed);
                }
            } else if c > at {
                self.body().cursor.store(c - 1, Relaxed);
            }
        }
    }

    fn notify_prepended(&mut self) {
        for s in self.strong_slots().iter_mut() {
            if s.pos != u64::MAX {
                s.pos += 1;
            }
        }
    }
}

enum SetPlan {
    Table,
    DenseInPlace(usize),
    DenseAppend,
    FreshRecord,
    FreshHash,
    Hash,
    RecordInPlace(usize),
    RecordWiden(&'static Shape),
    Escalate,
}

enum RemovePlan {
    Table,
    Miss,
    DenseLast,
    Hash,
}

impl Clone for Array {
    fn clone(&self) -> Self {
        let body = self.body();
        if body.rc.load(Relaxed) != STATIC_RC {
            body.rc.fetch_add(1, Relaxed);
        }
        Array { ptr: self.ptr }
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        let body = self.body();
        if body.rc.load(Relaxed) == STATIC_RC {
            return;
        }
        if body.rc.fetch_sub(1, Relaxed) == 1 {
            // Safety: last handle; the body was allocated with `Box::into_raw`
            unsafe {
                drop(Box::from_raw(self.ptr.as_ptr()));
            }
        }
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        let mut p = self.iter_begin();
        let mut q = other.iter_begin();
        while p.is_valid() && q.is_valid() {
            if self.key_at(p) != other.key_at(q) || self.value_at(p) != other.value_at(q) {
                return false;
            }
            p = self.iter_advance(p);
            q = other.iter_advance(q);
        }
        !p.is_valid() && !q.is_valid()
    }
}

impl Debug for Array {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<T: Into<Value>> FromIterator<T> for Array {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut d = DenseArray::new();
        for v in iter {
            d.push(v.into());
        }
        if d.is_empty() {
            Array::new()
        } else {
            Array::from_parts(Repr::Dense(d))
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Array {
    fn from(other: Vec<T>) -> Self {
        other.into_iter().collect()
    }
}

/// Iterator over `(key, value)` pairs; see [`Array::iter`].
pub struct Entries<'a> {
    arr: &'a Array,
    pos: Pos,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos.is_valid() {
            let pair = self.arr.pair_at(self.pos);
            self.pos = self.arr.iter_advance(self.pos);
            if pair.is_some() {
                return pair;
            }
        }
        None
    }
}

impl<'a> IntoIterator for &'a Array {
    type Item = (Value, Value);
    type IntoIter = Entries<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
