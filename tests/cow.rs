//! Copy-on-write isolation across outstanding handles.

use varray::{Array, ArrayKind, Value, VarRef};

#[test]
fn shared_handles_never_observe_each_others_writes() {
    let mut a = Array::new();
    for i in 0..10 {
        a.append(i).unwrap();
    }
    let b = a.clone();
    let c = a.clone();
    assert_eq!(a.refcount(), 3);

    a.set(0, -1).unwrap();
    assert_eq!(b.get(0), Some(Value::Int(0)));
    assert_eq!(c.get(0), Some(Value::Int(0)));
    assert_eq!(a.get(0), Some(Value::Int(-1)));
    assert!(b.ptr_eq(&c));
    assert!(!a.ptr_eq(&b));
}

#[test]
fn every_mutating_operation_separates() {
    let base: Array = vec![1, 2, 3].into();

    let ops: Vec<fn(&mut Array)> = vec![
        |a| a.set(0, 9).unwrap(),
        |a| {
            a.remove(2);
        },
        |a| a.append(4).unwrap(),
        |a| {
            a.pop().unwrap();
        },
        |a| {
            a.dequeue().unwrap();
        },
        |a| a.prepend(0).unwrap(),
        |a| {
            *a.lval(1).unwrap() = Value::Int(8);
        },
        |a| {
            a.cursor_advance();
        },
    ];
    for op in ops {
        let mut fork = base.clone();
        op(&mut fork);
        assert_eq!(base.len(), 3);
        assert_eq!(base.get(0), Some(Value::Int(1)));
        assert_eq!(base.get(1), Some(Value::Int(2)));
        assert_eq!(base.get(2), Some(Value::Int(3)));
    }
}

#[test]
fn the_canonical_empty_array_is_immutable() {
    let mut a = Array::new();
    let empty = Array::new();
    a.append(1).unwrap();
    assert!(!a.ptr_eq(&empty));
    assert!(empty.is_empty());
    assert_eq!(a.len(), 1);
}

#[test]
fn record_copy_on_write_keeps_the_shared_shape() {
    let mut a = Array::new();
    a.set("f", 1).unwrap();
    a.set("g", 2).unwrap();
    let b = a.clone();

    a.set("f", 10).unwrap();
    assert!(!a.ptr_eq(&b));
    // Both instances still share the interned shape.
    assert!(std::ptr::eq(a.shape().unwrap(), b.shape().unwrap()));
    assert_eq!(b.get("f"), Some(Value::Int(1)));
}

#[test]
fn escalating_a_shared_array_leaves_the_original_alone() {
    let mut a: Array = vec![1, 2].into();
    let b = a.clone();
    a.set("text", 3).unwrap();
    assert_eq!(a.kind(), ArrayKind::Hash);
    assert_eq!(b.kind(), ArrayKind::Dense);
    assert_eq!(b.len(), 2);
}

#[test]
fn bound_references_bypass_value_copies() {
    let r = VarRef::new(Value::Int(0));
    let mut a = Array::new();
    a.set_ref("slot", r.clone()).unwrap();
    let b = a.clone();

    // Writing *through the reference* is visible through both handles:
    // the boxed cell is aliased by design.
    r.set(Value::Int(42));
    assert_eq!(a.get("slot").unwrap().unboxed(), Value::Int(42));
    assert_eq!(b.get("slot").unwrap().unboxed(), Value::Int(42));

    // Replacing the *slot* still copies on write.
    a.set("slot", 7).unwrap();
    assert_eq!(b.get("slot").unwrap().unboxed(), Value::Int(42));
    assert_eq!(a.get("slot"), Some(Value::Int(7)));
}

#[test]
fn deep_structures_share_until_the_written_spine() {
    let leaf: Array = vec![1].into();
    let mut mid = Array::new();
    mid.set("leaf", leaf.clone()).unwrap();
    let mut top = Array::new();
    top.set("mid", mid.clone()).unwrap();

    let snapshot = top.clone();

    // Writing a new top-level key separates only the top body.
    top.set("other", true).unwrap();
    assert!(!top.ptr_eq(&snapshot));
    let mid_after = top.get("mid").unwrap();
    assert!(mid_after.as_array().unwrap().ptr_eq(&mid));
    assert!(leaf.is_shared());
    assert!(!snapshot.exists("other"));
}
