// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use cradle_rs::{
    core::{
        blob::{Blob, BlobFileWriter},
        id::{CapturedId, RequestId, ValueId, get_unique_string},
        unique_hash::{UniqueHasher, UpdateUniqueHash, get_unique_string_for},
        value::Value,
    },
};
use tempfile::tempdir;

fn digest_of(value: &Value) -> String {
    let mut hasher = UniqueHasher::new();
    value.update_unique_hash(&mut hasher);
    hasher.finish_hex()
}

#[test]
fn digest_is_64_lowercase_hex_chars() {
    let digest = digest_of(&Value::Int(42));
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(digest, digest.to_lowercase());
}

#[test]
fn equal_values_hash_equal() {
    assert_eq!(digest_of(&Value::Int(7)), digest_of(&Value::Int(7)));
    assert_eq!(
        digest_of(&Value::Str("abc".into())),
        digest_of(&Value::Str("abc".into()))
    );
}

#[test]
fn different_types_do_not_collide() {
    // "1" and 1 share no digest, nor do 1 and 1.0.
    assert_ne!(digest_of(&Value::Str("1".into())), digest_of(&Value::Int(1)));
    assert_ne!(digest_of(&Value::Int(1)), digest_of(&Value::Float(1.0)));
}

#[test]
fn aggregate_hash_covers_element_count() {
    // ((1,2),(3)) must not collide with ((1),(2,3)).
    let a = Value::List(vec![
        Value::List(vec![Value::Int(1), Value::Int(2)]),
        Value::List(vec![Value::Int(3)]),
    ]);
    let b = Value::List(vec![
        Value::List(vec![Value::Int(1)]),
        Value::List(vec![Value::Int(2), Value::Int(3)]),
    ]);
    assert_ne!(digest_of(&a), digest_of(&b));
}

#[test]
fn blob_provenance_distinguishes_digests() -> Result<()> {
    let dir = tempdir()?;
    let mut writer = BlobFileWriter::create(dir.path().join("blob_0"), 4)?;
    writer.data_mut().copy_from_slice(b"abcd");
    let file_blob = writer.on_write_completed()?;
    let inline_blob = Blob::from_bytes(b"abcd".to_vec());

    // Same bytes, different provenance: the blobs compare equal but their
    // digests must differ.
    assert_eq!(file_blob, inline_blob);
    assert_ne!(
        digest_of(&Value::Blob(file_blob)),
        digest_of(&Value::Blob(inline_blob))
    );
    Ok(())
}

#[test]
fn captured_id_digest_covers_uuid_and_args() {
    let arg1 = CapturedId::new(ValueId(Value::Int(2)));
    let arg2 = CapturedId::new(ValueId(Value::Int(3)));
    let id_a = RequestId::new("rq_a+1.0+mem".into(), vec![arg1.clone(), arg2.clone()]);
    let id_b = RequestId::new("rq_b+1.0+mem".into(), vec![arg1.clone(), arg2.clone()]);
    let id_c = RequestId::new("rq_a+1.0+mem".into(), vec![arg2, arg1]);
    assert_ne!(get_unique_string(&id_a), get_unique_string(&id_b));
    assert_ne!(get_unique_string(&id_a), get_unique_string(&id_c));
    assert_eq!(get_unique_string(&id_a), get_unique_string(&id_a));
}

#[test]
fn request_id_arg_grouping_does_not_collide() {
    // One argument (1,2) plus one argument (3) versus (1) plus (2,3).
    let grouped_a = RequestId::new(
        "rq+1.0+mem".into(),
        vec![
            CapturedId::new(ValueId(Value::List(vec![Value::Int(1), Value::Int(2)]))),
            CapturedId::new(ValueId(Value::List(vec![Value::Int(3)]))),
        ],
    );
    let grouped_b = RequestId::new(
        "rq+1.0+mem".into(),
        vec![
            CapturedId::new(ValueId(Value::List(vec![Value::Int(1)]))),
            CapturedId::new(ValueId(Value::List(vec![Value::Int(2), Value::Int(3)]))),
        ],
    );
    assert_ne!(get_unique_string(&grouped_a), get_unique_string(&grouped_b));
}

#[test]
fn unique_string_for_primitives() {
    assert_eq!(get_unique_string_for("hello").len(), 64);
    assert_ne!(get_unique_string_for("hello"), get_unique_string_for("world"));
    assert_eq!(get_unique_string_for(&7i64), get_unique_string_for(&7i64));
}

#[test]
fn combine_folds_one_digest_into_another() {
    let mut hasher = UniqueHasher::new();
    let inner = {
        let mut h = UniqueHasher::new();
        Value::Int(1).update_unique_hash(&mut h);
        h.finish()
    };
    hasher.combine(&inner);
    let combined = hasher.finish_hex();

    let mut plain = UniqueHasher::new();
    Value::Int(1).update_unique_hash(&mut plain);
    assert_ne!(combined, plain.finish_hex());
}
