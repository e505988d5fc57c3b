//! Serde serialization
//!
//! Implemented strictly on top of the public iteration contract: positions,
//! key and value accessors. No serializer ever sees a representation's
//! internal buffers. Dense arrays serialize as sequences; every other
//! representation serializes as a map in insertion order.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::array::{Array, ArrayKind};
use crate::key::Key;
use crate::text::Text;
use crate::value::{Value, VarRef};

impl Serialize for Text {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Int(i) => serializer.serialize_i64(*i),
            Key::Text(t) => t.serialize(serializer),
        }
    }
}

impl Serialize for VarRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Text(t) => t.serialize(serializer),
            Value::Array(a) => a.serialize(serializer),
            Value::Ref(r) => r.serialize(serializer),
        }
    }
}

impl Serialize for Array {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.kind() == ArrayKind::Dense {
            let mut seq = serializer.serialize_seq(Some(self.len()))?;
            for (_, v) in self.iter() {
                seq.serialize_element(&v)?;
            }
            seq.end()
        } else {
            let mut map = serializer.serialize_map(Some(self.len()))?;
            for (k, v) in self.iter() {
                map.serialize_entry(&k, &v)?;
            }
            map.end()
        }
    }
}
