//! Verifies that interning deduplicates text reachable from array values:
//! every repetition of an interned string inside a structure shares one
//! backing allocation, and lookups through any copy hit the identity fast
//! path.

use std::collections::HashSet;

use varray::{Array, Text, Value};

/// Collects the distinct backing pointers of every text value in `value`
/// whose content is `needle`, recursively.
fn collect_matching_ptrs(value: &Value, needle: &str, seen: &mut HashSet<usize>) {
    match value {
        Value::Text(t) => {
            if t.as_str() == needle {
                seen.insert(t.as_str().as_ptr() as usize);
            }
        }
        Value::Array(arr) => {
            for (k, v) in arr.iter() {
                collect_matching_ptrs(&k, needle, seen);
                collect_matching_ptrs(&v, needle, seen);
            }
        }
        Value::Ref(r) => collect_matching_ptrs(&r.get(), needle, seen),
        _ => {}
    }
}

#[test]
fn repeated_interned_strings_share_storage() {
    const NAME: &str = "org.example.RequestHandler";
    let class_name = Text::intern(NAME);
    let mut rows = Array::new();
    for i in 0..8 {
        let mut row = Array::new();
        row.set("handler", class_name.clone()).unwrap();
        row.set("label", Text::intern(NAME)).unwrap();
        rows.set(i, row).unwrap();
    }

    let mut seen = HashSet::new();
    collect_matching_ptrs(&Value::Array(rows.clone()), NAME, &mut seen);
    // 16 stored handles, one backing allocation.
    assert_eq!(seen.len(), 1);
}

#[test]
fn distinct_strings_keep_distinct_storage() {
    let one = Text::intern("value-number-one");
    let two = Text::intern("value-number-two");
    assert!(!one.same_identity(&two));
    assert_ne!(one.as_str().as_ptr(), two.as_str().as_ptr());
}

#[test]
fn un_interned_copies_do_not_dedup() {
    let a = Text::new("dynamic string value");
    let b = Text::new("dynamic string value");
    assert_eq!(a, b);
    assert!(!a.same_identity(&b));
    assert_ne!(a.as_str().as_ptr(), b.as_str().as_ptr());
}

#[test]
fn interned_keys_resolve_by_identity_across_arrays() {
    let key = Text::intern("configuration-entry");
    let mut a = Array::new();
    a.set(key.clone(), 1).unwrap();

    // A freshly interned handle for the same literal is the same identity,
    // so the lookup needs no byte comparison.
    let again = Text::intern("configuration-entry");
    assert!(key.same_identity(&again));
    assert_eq!(a.get(again), Some(Value::Int(1)));
}

#[test]
fn interning_inside_values_survives_copies_and_escalation() {
    const NAME: &str = "shared.literal.payload";
    let mut a = Array::new();
    a.set("k", Text::intern(NAME)).unwrap();
    let mut b = a.copy();
    b.set(0, Text::intern(NAME)).unwrap(); // escalates the copy

    let mut seen = HashSet::new();
    collect_matching_ptrs(&Value::Array(a.clone()), NAME, &mut seen);
    collect_matching_ptrs(&Value::Array(b.clone()), NAME, &mut seen);
    assert_eq!(seen.len(), 1);
}
