// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use anyhow::Result;
use cradle_rs::{
    core::{blob::Blob, value::Value},
    encodings::{
        json::{value_from_json, value_to_json},
        msgpack::{BlobFilePolicy, pack_value, unpack_value},
    },
};

#[test]
fn deep_size_accounting() {
    assert_eq!(Value::Int(7).deep_size(), 8);
    assert_eq!(Value::Float(1.5).deep_size(), 8);
    assert_eq!(Value::Str("abcde".into()).deep_size(), 5);
    assert_eq!(Value::Blob(Blob::from_bytes(vec![0u8; 4])).deep_size(), 4);
    let list = Value::List(vec![Value::Int(1), Value::Str("ab".into())]);
    assert_eq!(list.deep_size(), 8 + 8 + 2);
}

#[test]
fn ordering_is_total() {
    // Different kinds order by kind rank; same kinds by value.
    assert!(Value::Int(5) < Value::Str("a".into()));
    assert!(Value::Int(3) < Value::Int(4));
    assert!(Value::Str("a".into()) < Value::Str("b".into()));
    // Floats participate through their IEEE total order, so NaN is fine.
    let nan = Value::Float(f64::NAN);
    assert_eq!(nan.cmp(&nan), std::cmp::Ordering::Equal);
    assert_eq!(nan, nan);
}

#[test]
fn equal_values_have_equal_hashes() {
    use std::hash::{DefaultHasher, Hash, Hasher};
    let hash = |v: &Value| {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    };
    let a = Value::List(vec![Value::Int(1), Value::Str("x".into())]);
    let b = Value::List(vec![Value::Int(1), Value::Str("x".into())]);
    assert_eq!(hash(&a), hash(&b));
}

#[test]
fn conversions() {
    assert_eq!(Value::from(5i32), Value::Int(5));
    assert_eq!(Value::from("hi"), Value::Str("hi".into()));
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::Int(9).as_int(), Some(9));
    assert_eq!(Value::Int(9).as_str(), None);
}

#[test]
fn json_round_trip() -> Result<()> {
    let mut map = BTreeMap::new();
    map.insert("k".to_string(), Value::Int(1));
    let value = Value::List(vec![
        Value::Nil,
        Value::Bool(true),
        Value::Int(-3),
        Value::Float(2.5),
        Value::Str("text".into()),
        Value::Blob(Blob::from_bytes(vec![0u8, 1, 2, 255])),
        Value::Map(map),
    ]);
    let json = value_to_json(&value);
    let back = value_from_json(&json)?;
    assert_eq!(back, value);
    Ok(())
}

#[test]
fn msgpack_round_trip_inline() -> Result<()> {
    let value = Value::List(vec![
        Value::Int(1),
        Value::Str("s".into()),
        Value::Blob(Blob::from_bytes(vec![9u8; 40])),
        Value::Float(0.25),
        Value::Bool(false),
        Value::Nil,
    ]);
    let bytes = pack_value(&value, BlobFilePolicy::Inline)?;
    let back = unpack_value(&bytes, BlobFilePolicy::Inline)?;
    assert_eq!(back, value);
    Ok(())
}

#[test]
fn msgpack_dump_renders_nested_values() -> Result<()> {
    use cradle_rs::encodings::msgpack::dump_msgpack;

    let mut map = BTreeMap::new();
    map.insert("answer".to_string(), Value::Int(42));
    map.insert(
        "parts".to_string(),
        Value::List(vec![Value::Str("x".into()), Value::Bool(true)]),
    );
    let bytes = pack_value(&Value::Map(map), BlobFilePolicy::Inline)?;
    let text = dump_msgpack(&bytes)?;
    assert!(text.contains("map of 2 entries"));
    assert!(text.contains("answer: 42"));
    assert!(text.contains("list of 2 items"));
    Ok(())
}

#[test]
fn msgpack_blob_packs_as_bin() -> Result<()> {
    let value = Value::Blob(Blob::from_bytes(vec![1u8, 2, 3]));
    let bytes = pack_value(&value, BlobFilePolicy::Inline)?;
    // bin8 marker, length 3, payload.
    assert_eq!(bytes, vec![0xc4, 3, 1, 2, 3]);
    Ok(())
}
