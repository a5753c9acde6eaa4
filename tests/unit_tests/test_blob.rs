// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use cradle_rs::{
    blob_file::BlobFileDirectory,
    core::{blob::Blob, value::Value},
    encodings::{
        json::{value_from_json, value_to_json},
        msgpack::{BlobFilePolicy, pack_value, unpack_value},
    },
};
use tempfile::tempdir;

#[test]
fn equality_is_by_content_not_owner() {
    let a = Blob::from_bytes(b"hello".to_vec());
    let b = Blob::from_string("hello".to_string());
    let c = Blob::from_static(b"hello");
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_ne!(a, Blob::from_bytes(b"hellO".to_vec()));
}

#[test]
fn ordering_is_length_first() {
    let short = Blob::from_bytes(b"zz".to_vec());
    let long = Blob::from_bytes(b"aaa".to_vec());
    assert!(short < long);
    assert!(Blob::from_bytes(b"aa".to_vec()) < Blob::from_bytes(b"ab".to_vec()));
}

#[test]
fn display_summary_formats() {
    assert_eq!(format!("{}", Blob::from_static(&[])), "0-bytes blob");
    assert_eq!(format!("{}", Blob::from_bytes(vec![0u8])), "1-byte blob: 00");
    assert_eq!(
        format!("{}", Blob::from_bytes(b"hello".to_vec())),
        "5-bytes blob: hello"
    );
    let long = Blob::from_bytes((0u8..30).collect::<Vec<_>>());
    let text = format!("{long}");
    assert!(text.starts_with("30-bytes blob: "));
    assert!(text.contains(" ... "));
}

#[test]
fn writer_freezes_into_file_backed_blob() -> Result<()> {
    let dir = tempdir()?;
    let blobs = BlobFileDirectory::open(dir.path().to_path_buf())?;
    let mut writer = blobs.make_writer(8)?;
    writer.data_mut().copy_from_slice(b"abcdefgh");
    let blob = writer.on_write_completed()?;

    assert_eq!(blob.as_slice(), b"abcdefgh");
    let (path, offset) = blob.mapped_file().expect("file-backed blob");
    assert_eq!(offset, 0);
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("blob_0"));

    // Reopening through the path yields the same bytes.
    let reopened = Blob::open_file(path)?;
    assert_eq!(reopened, blob);
    Ok(())
}

#[test]
fn open_file_at_views_a_suffix() -> Result<()> {
    let dir = tempdir()?;
    let blobs = BlobFileDirectory::open(dir.path().to_path_buf())?;
    let mut writer = blobs.make_writer(6)?;
    writer.data_mut().copy_from_slice(b"abcdef");
    let blob = writer.on_write_completed()?;
    let (path, _) = blob.mapped_file().expect("file-backed blob");

    let tail = Blob::open_file_at(path, 4)?;
    assert_eq!(tail.as_slice(), b"ef");
    assert_eq!(tail.mapped_file().map(|(_, o)| o), Some(4));
    Ok(())
}

#[test]
fn directory_scan_resumes_numbering() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("blob_0"), b"x")?;
    std::fs::write(dir.path().join("blob_7"), b"y")?;
    std::fs::write(dir.path().join("unrelated"), b"z")?;
    let blobs = BlobFileDirectory::open(dir.path().to_path_buf())?;
    let next = blobs.allocate_file();
    assert_eq!(next.file_name().and_then(|n| n.to_str()), Some("blob_8"));
    Ok(())
}

#[test]
fn json_inline_blob_round_trip() -> Result<()> {
    let value = Value::Blob(Blob::from_bytes(vec![0u8, 200, 31]));
    let json = value_to_json(&value);
    assert_eq!(json["as_file"], serde_json::json!(false));
    assert_eq!(json["size"], serde_json::json!(3));
    let back = value_from_json(&json)?;
    assert_eq!(back, value);
    Ok(())
}

#[test]
fn json_file_blob_serializes_by_path_and_offset() -> Result<()> {
    let dir = tempdir()?;
    let blobs = BlobFileDirectory::open(dir.path().to_path_buf())?;
    let mut writer = blobs.make_writer(4)?;
    writer.data_mut().copy_from_slice(b"data");
    let blob = writer.on_write_completed()?;

    let json = value_to_json(&Value::Blob(blob.clone()));
    assert_eq!(json["as_file"], serde_json::json!(true));
    assert_eq!(json["offset"], serde_json::json!(0));
    assert!(json.get("blob").is_none());

    let back = value_from_json(&json)?;
    assert_eq!(back.as_blob().map(Blob::as_slice), Some(&b"data"[..]));
    Ok(())
}

#[test]
fn msgpack_file_blob_by_reference() -> Result<()> {
    let dir = tempdir()?;
    let blobs = BlobFileDirectory::open(dir.path().to_path_buf())?;
    let mut writer = blobs.make_writer(4)?;
    writer.data_mut().copy_from_slice(b"wxyz");
    let blob = writer.on_write_completed()?;
    let value = Value::Blob(blob);

    // By reference: the encoding carries (path, offset), decoding remaps.
    let by_ref = pack_value(&value, BlobFilePolicy::ByReference)?;
    let back = unpack_value(&by_ref, BlobFilePolicy::ByReference)?;
    assert_eq!(back.as_blob().map(Blob::as_slice), Some(&b"wxyz"[..]));
    assert!(back.as_blob().and_then(Blob::mapped_file).is_some());

    // Inline: contents travel, provenance is dropped.
    let inline = pack_value(&value, BlobFilePolicy::Inline)?;
    let back = unpack_value(&inline, BlobFilePolicy::Inline)?;
    assert_eq!(back.as_blob().map(Blob::as_slice), Some(&b"wxyz"[..]));
    assert!(back.as_blob().and_then(Blob::mapped_file).is_none());
    Ok(())
}
