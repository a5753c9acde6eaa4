// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::json;

use crate::core::{
    blob::Blob,
    errors::{Error, Result},
    value::Value,
};

/// Renders a value as canonical JSON.
///
/// Blobs become tagged objects: `{"as_file": false, "size": N, "blob":
/// "<base64>"}` for inline payloads, `{"as_file": true, "path": "...",
/// "offset": N}` for file-backed ones.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::Blob(b) => blob_to_json(b),
        Value::List(v) => serde_json::Value::Array(v.iter().map(value_to_json).collect()),
        Value::Map(m) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in m {
                obj.insert(k.clone(), value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

pub fn blob_to_json(blob: &Blob) -> serde_json::Value {
    match blob.mapped_file() {
        Some((path, offset)) => json!({
            "as_file": true,
            "path": path.to_string_lossy(),
            "offset": offset,
        }),
        None => json!({
            "as_file": false,
            "size": blob.size(),
            "blob": BASE64.encode(blob.as_slice()),
        }),
    }
}

/// Parses a value from its canonical JSON form.
///
/// An object carrying an `"as_file"` boolean is a blob; any other object is
/// a map. Integral numbers become `Int`, fractional ones `Float`.
pub fn value_from_json(json: &serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(Error::MalformedJson(format!("unrepresentable number {n}")))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Array(items) => Ok(Value::List(
            items.iter().map(value_from_json).collect::<Result<_>>()?,
        )),
        serde_json::Value::Object(obj) => {
            if obj.get("as_file").is_some_and(serde_json::Value::is_boolean) {
                return Ok(Value::Blob(blob_from_json(obj)?));
            }
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), value_from_json(v)?);
            }
            Ok(Value::Map(map))
        }
    }
}

fn get_field<'a>(
    obj: &'a serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Result<&'a serde_json::Value> {
    obj.get(name)
        .ok_or_else(|| Error::MissingField(name.to_owned()))
}

pub fn blob_from_json(obj: &serde_json::Map<String, serde_json::Value>) -> Result<Blob> {
    let as_file = get_field(obj, "as_file")?
        .as_bool()
        .ok_or_else(|| Error::MalformedJson("\"as_file\" must be a boolean".into()))?;
    if as_file {
        let path = get_field(obj, "path")?
            .as_str()
            .ok_or_else(|| Error::MalformedJson("\"path\" must be a string".into()))?;
        let offset = get_field(obj, "offset")?
            .as_u64()
            .ok_or_else(|| Error::MalformedJson("\"offset\" must be an integer".into()))?;
        Blob::open_file_at(path, offset)
    } else {
        let size = get_field(obj, "size")?
            .as_u64()
            .ok_or_else(|| Error::MalformedJson("\"size\" must be an integer".into()))?;
        let encoded = get_field(obj, "blob")?
            .as_str()
            .ok_or_else(|| Error::MalformedJson("\"blob\" must be a string".into()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::MalformedJson(format!("bad base64 blob: {e}")))?;
        if bytes.len() as u64 != size {
            return Err(Error::MalformedJson(format!(
                "blob size {} does not match declared size {size}",
                bytes.len()
            )));
        }
        Ok(Blob::from_bytes(bytes))
    }
}
