// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use serde::{
    Deserialize, Serialize, Serializer,
    de::{self, DeserializeSeed, Visitor},
    ser::{SerializeMap, SerializeSeq, SerializeTuple},
};

use crate::core::{
    blob::Blob,
    errors::{Error, Result},
    value::Value,
};

/// Whether file-backed blobs may be encoded by reference.
///
/// With `Inline`, every blob packs as BIN and decoding is unambiguous; this
/// is the codec for storages and peers that cannot alias blob files. With
/// `ByReference`, file-backed blobs pack as a 2-element `[path, offset]`
/// array; decoding maps such arrays back to blobs, so plain list values of
/// exactly that shape cannot ride through this codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFilePolicy {
    Inline,
    ByReference,
}

struct ValueSer<'a> {
    value: &'a Value,
    policy: BlobFilePolicy,
}

impl Serialize for ValueSer<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Blob(b) => match (self.policy, b.mapped_file()) {
                (BlobFilePolicy::ByReference, Some((path, offset))) => {
                    let mut tup = serializer.serialize_tuple(2)?;
                    tup.serialize_element(&path.to_string_lossy())?;
                    tup.serialize_element(&offset)?;
                    tup.end()
                }
                _ => serializer.serialize_bytes(b.as_slice()),
            },
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&ValueSer {
                        value: item,
                        policy: self.policy,
                    })?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(
                        k,
                        &ValueSer {
                            value: v,
                            policy: self.policy,
                        },
                    )?;
                }
                map.end()
            }
        }
    }
}

/// Packs a value as msgpack. Blobs become BIN payloads; under
/// [`BlobFilePolicy::ByReference`], file-backed blobs become `[path,
/// offset]` pairs instead.
pub fn pack_value(value: &Value, policy: BlobFilePolicy) -> Result<Vec<u8>> {
    rmp_serde::to_vec(&ValueSer { value, policy })
        .map_err(|e| Error::Encoding(format!("msgpack pack failed: {e}")))
}

#[derive(Clone, Copy)]
struct ValueSeed {
    policy: BlobFilePolicy,
}

impl<'de> DeserializeSeed<'de> for ValueSeed {
    type Value = Value;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor {
            policy: self.policy,
        })
    }
}

struct ValueVisitor {
    policy: BlobFilePolicy,
}

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a msgpack-encoded value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Str(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Blob(Blob::from_bytes(v.to_vec())))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Blob(Blob::from_bytes(v)))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let seed = ValueSeed {
            policy: self.policy,
        };
        let mut items = Vec::new();
        while let Some(item) = seq.next_element_seed(seed)? {
            items.push(item);
        }
        if self.policy == BlobFilePolicy::ByReference
            && let [Value::Str(path), Value::Int(offset)] = items.as_slice()
        {
            let offset = u64::try_from(*offset)
                .map_err(|_| de::Error::custom(format!("negative blob offset {offset}")))?;
            let blob = Blob::open_file_at(path, offset)
                .map_err(|e| de::Error::custom(format!("cannot open blob file: {e}")))?;
            return Ok(Value::Blob(blob));
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: de::MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let seed = ValueSeed {
            policy: self.policy,
        };
        let mut map = BTreeMap::new();
        while let Some(key) = access.next_key::<String>()? {
            let value = access.next_value_seed(seed)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

/// Unpacks a msgpack-encoded value. The policy must match the one used to
/// pack it.
pub fn unpack_value(bytes: &[u8], policy: BlobFilePolicy) -> Result<Value> {
    let mut de = rmp_serde::Deserializer::new(bytes);
    let seed = ValueSeed { policy };
    seed.deserialize(&mut de)
        .map_err(|e| Error::Encoding(format!("msgpack unpack failed: {e}")))
}

/// Renders a msgpack payload as indented text, for logs and debugging.
pub fn dump_msgpack(bytes: &[u8]) -> Result<String> {
    let value = unpack_value(bytes, BlobFilePolicy::Inline)?;
    let mut out = String::new();
    dump_into(&value, 1, &mut out);
    Ok(out)
}

fn dump_into(value: &Value, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match value {
        Value::List(items) => {
            out.push_str(&format!("list of {} items", items.len()));
            for item in items {
                out.push('\n');
                out.push_str(&pad);
                out.push_str("- ");
                dump_into(item, indent + 1, out);
            }
        }
        Value::Map(entries) => {
            out.push_str(&format!("map of {} entries", entries.len()));
            for (key, item) in entries {
                out.push('\n');
                out.push_str(&pad);
                out.push_str(&format!("{key}: "));
                dump_into(item, indent + 1, out);
            }
        }
        scalar => out.push_str(&format!("{scalar}")),
    }
}

/// Blanket serde impls using the inline codec, for embedding values in
/// other serde structures.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ValueSer {
            value: self,
            policy: BlobFilePolicy::Inline,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        ValueSeed {
            policy: BlobFilePolicy::Inline,
        }
        .deserialize(deserializer)
    }
}
