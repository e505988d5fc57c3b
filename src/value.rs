//! The tagged value cell and the boxed reference type
//!
//! [`Value`] is the uniform storage unit: a fixed-size discriminated cell of a
//! type tag and a 64-bit payload. It owns no memory itself; every counted
//! payload (text, array, boxed reference) carries its own embedded count, and
//! cloning or dropping a cell maintains those counts through the payload
//! handles. Replacing a cell's contents constructs the new payload before the
//! old one is released, so a cell is never observable in a half-transitioned
//! state.

use std::fmt::{self, Debug, Formatter};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};
use std::sync::Mutex;

use crate::array::Array;
use crate::text::Text;

/// Type tag of a [`Value`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Array,
    Ref,
}

/// A tagged value: the uniform storage cell for every array slot.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Text),
    Array(Array),
    /// A shared, reference-counted binding; see [`VarRef`].
    Ref(VarRef),
}

impl Value {
    /// Returns the type tag of this cell.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Array(_) => ValueType::Array,
            Value::Ref(_) => ValueType::Ref,
        }
    }

    /// Whether the payload is reference-counted.
    #[must_use]
    pub fn is_counted(&self) -> bool {
        matches!(self, Value::Text(_) | Value::Array(_) | Value::Ref(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reads through a boxed reference; other values are returned as-is.
    #[must_use]
    pub fn unboxed(&self) -> Value {
        match self {
            Value::Ref(r) => r.get(),
            other => other.clone(),
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ref_value(&self) -> Option<&VarRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => *a as f64 == *b,
            (Text(a), Text(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Ref(a), Ref(b)) => a.ptr_eq(b) || a.get() == b.get(),
            (Ref(a), b) => a.get() == *b,
            (a, Ref(b)) => *a == b.get(),
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => Debug::fmt(b, f),
            Value::Int(i) => Debug::fmt(i, f),
            Value::Float(x) => Debug::fmt(x, f),
            Value::Text(t) => Debug::fmt(t, f),
            Value::Array(a) => Debug::fmt(a, f),
            Value::Ref(r) => write!(f, "&{:?}", r.get()),
        }
    }
}

impl From<bool> for Value {
    fn from(other: bool) -> Self {
        Value::Bool(other)
    }
}
impl From<i64> for Value {
    fn from(other: i64) -> Self {
        Value::Int(other)
    }
}
impl From<i32> for Value {
    fn from(other: i32) -> Self {
        Value::Int(other.into())
    }
}
impl From<f64> for Value {
    fn from(other: f64) -> Self {
        Value::Float(other)
    }
}
impl From<&str> for Value {
    fn from(other: &str) -> Self {
        Value::Text(Text::intern(other))
    }
}
impl From<String> for Value {
    fn from(other: String) -> Self {
        Value::Text(Text::new(other.as_str()))
    }
}
impl From<Text> for Value {
    fn from(other: Text) -> Self {
        Value::Text(other)
    }
}
impl From<Array> for Value {
    fn from(other: Array) -> Self {
        Value::Array(other)
    }
}
impl From<VarRef> for Value {
    fn from(other: VarRef) -> Self {
        Value::Ref(other)
    }
}

struct RefBody {
    rc: AtomicU32,
    cell: Mutex<Value>,
}

/// A reference-counted boxed reference.
///
/// Binding the same `VarRef` into two slots aliases them: a write through one
/// handle is observed through every other. The count is atomic; mutation of
/// the inner cell is serialized by the embedding runtime's ownership rules,
/// with a lock guarding against torn reads.
pub struct VarRef {
    ptr: NonNull<RefBody>,
}

// Safety: the body is only reached through the counted handle and its inner
// cell is lock-guarded.
unsafe impl Send for VarRef {}
unsafe impl Sync for VarRef {}

impl VarRef {
    /// Boxes `value` into a fresh reference with a count of one.
    #[must_use]
    pub fn new(value: Value) -> Self {
        let body = Box::new(RefBody {
            rc: AtomicU32::new(1),
            cell: Mutex::new(value),
        });
        VarRef {
            // Safety: `Box::into_raw` never returns null
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(body)) },
        }
    }

    fn body(&self) -> &RefBody {
        // Safety: the body lives for as long as any handle does
        unsafe { self.ptr.as_ref() }
    }

    /// Reads the current value out of the box.
    #[must_use]
    pub fn get(&self) -> Value {
        self.body()
            .cell
            .lock()
            .expect("ref cell lock should succeed")
            .clone()
    }

    /// Replaces the boxed value; visible through every handle.
    pub fn set(&self, value: Value) {
        *self
            .body()
            .cell
            .lock()
            .expect("ref cell lock should succeed") = value;
    }

    /// Number of live handles to this box.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.body().rc.load(Relaxed)
    }

    /// Whether two handles share the same box.
    #[must_use]
    pub fn ptr_eq(&self, other: &VarRef) -> bool {
        self.ptr == other.ptr
    }
}

impl Clone for VarRef {
    fn clone(&self) -> Self {
        self.body().rc.fetch_add(1, Relaxed);
        VarRef { ptr: self.ptr }
    }
}

impl Drop for VarRef {
    fn drop(&mut self) {
        if self.body().rc.fetch_sub(1, Relaxed) == 1 {
            // Safety: last handle; the body was allocated with `Box::into_raw`
            unsafe {
                drop(Box::from_raw(self.ptr.as_ptr()));
            }
        }
    }
}

impl Debug for VarRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VarRef({:?})", self.get())
    }
}
