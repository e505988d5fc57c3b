//! # varray
//!
//! The value-representation core of a dynamic-language runtime: the
//! polymorphic ordered array/map abstraction that backs every map-like value
//! in the language, together with the reference-counting and tagged-value
//! conventions that make shared mutation safe.
//!
//! The main types:
//!
//! - [`Value`]: a fixed-size tagged cell (type tag + payload) used as the
//!   uniform storage unit. Counted payloads maintain embedded reference
//!   counts through their handles.
//! - [`Text`]: an interned, small-buffer-optimized, reference-counted string
//!   with a cached content hash. Interned handles compare by identity.
//! - [`Array`]: a reference-counted handle to one of four physical
//!   representations (dense vector, general hash, shaped record, external
//!   table adapter). Mutation is copy-on-write: a shared body is never
//!   touched, the handle adopts a private copy or a more general
//!   representation (*escalation*) first, transparently.
//! - [`Shape`]: the interned key-order→slot layout shared by all record
//!   arrays with the same key insertion order.
//! - [`VarRef`]: a reference-counted boxed reference for by-reference
//!   binding; writes through one handle are observed through all.
//!
//! ```
//! use varray::{Array, ArrayKind, Value};
//!
//! let mut a = Array::new();
//! a.set("host", "localhost").unwrap();
//! a.set("port", 8080).unwrap();
//! assert_eq!(a.kind(), ArrayKind::Record);
//!
//! let snapshot = a.clone();      // shared: next write copies
//! a.set(0, "positional").unwrap(); // integer key: escalates to the hash form
//! assert_eq!(a.kind(), ArrayKind::Hash);
//! assert_eq!(snapshot.kind(), ArrayKind::Record);
//! assert_eq!(snapshot.get("port"), Some(Value::Int(8080)));
//! ```

mod array;
mod dense;
mod error;
mod hash;
mod key;
mod record;
mod ser;
mod shape;
mod table;
mod text;
mod value;

pub use array::{Array, ArrayKind, Entries, MergeOp, Pos, StrongId};
pub use error::ArrayError;
pub use key::Key;
pub use shape::{Shape, MAX_SHAPE_FIELDS};
pub use table::{new_shared_scope, ScopeTable, SharedScope};
pub use text::Text;
pub use value::{Value, ValueType, VarRef};

/// Sentinel reference count marking immutable, process-lifetime entities
/// (interned text, the canonical empty array). They are never freed; cloning
/// and dropping skip counting, and every mutation path treats them as shared
/// so it copies first.
pub(crate) const STATIC_RC: u32 = u32::MAX;
