#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use varray::{Array, MergeOp, Value};

#[derive(Arbitrary, Debug)]
enum Op {
    SetInt { key: i8, value: i32 },
    SetText { key: u8, value: i32 },
    Append { value: i32 },
    Remove { key: i8 },
    RemoveText { key: u8 },
    Pop,
    Dequeue,
    Prepend { value: i32 },
    Renumber,
    Fork,
    MergeSelf { plus: bool },
    CursorWalk,
}

const TEXT_KEYS: &[&str] = &["id", "name", "flags", "parent", "payload", "first", "last", "mode"];

fuzz_target!(|ops: Vec<Op>| {
    let mut arr = Array::new();
    let mut forks: Vec<(Array, usize)> = Vec::new();

    for op in ops {
        match op {
            Op::SetInt { key, value } => {
                arr.set(key as i64, value).unwrap();
            }
            Op::SetText { key, value } => {
                let k = TEXT_KEYS[key as usize % TEXT_KEYS.len()];
                arr.set(k, value).unwrap();
            }
            Op::Append { value } => {
                arr.append(value).unwrap();
            }
            Op::Remove { key } => {
                arr.remove(key as i64);
            }
            Op::RemoveText { key } => {
                arr.remove(TEXT_KEYS[key as usize % TEXT_KEYS.len()]);
            }
            Op::Pop => {
                arr.pop().unwrap();
            }
            Op::Dequeue => {
                arr.dequeue().unwrap();
            }
            Op::Prepend { value } => {
                arr.prepend(value).unwrap();
            }
            Op::Renumber => {
                arr.renumber().unwrap();
            }
            Op::Fork => {
                if forks.len() < 4 {
                    forks.push((arr.clone(), arr.len()));
                }
            }
            Op::MergeSelf { plus } => {
                let other = arr.clone();
                let op = if plus { MergeOp::Plus } else { MergeOp::Merge };
                // Merging with a handle to the same body must separate first.
                let _ = arr.merge(&other, op);
            }
            Op::CursorWalk => {
                arr.cursor_reset();
                while arr.cursor_advance().is_some() {}
            }
        }

        // Iteration agrees with the reported size and yields live values.
        let mut n = 0;
        for (k, _) in arr.iter() {
            assert!(matches!(k, Value::Int(_) | Value::Text(_)));
            n += 1;
        }
        assert_eq!(n, arr.len());
    }

    // Forked handles never shrank or changed length under later mutation.
    for (fork, len) in forks {
        assert_eq!(fork.len(), len);
    }
});
