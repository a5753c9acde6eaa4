// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::{
    core::errors::{Error, Result},
    encodings::json::{value_from_json, value_to_json},
    requests::request::{Request, rq_value},
    resolve::seri_registry::SeriRegistry,
};

// The uuid appears in the JSON like
//   "uuid": "rq_add_numbers+0.1.0+mem"
// Scanning the text for it is easier than parsing the JSON, and works on
// partially malformed input too.
static UUID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""uuid"\s*:\s*"([^"]+)""#).expect("static regex"));

/// Extracts the root uuid from a serialized request. The `"uuid"` field is
/// always the first field of the root object.
pub fn extract_uuid_str(seri_req: &str) -> Result<String> {
    UUID_RE
        .captures(seri_req)
        .map(|caps| caps[1].to_owned())
        .ok_or_else(|| Error::Uuid(format!("no uuid found in JSON: {seri_req}")))
}

/// Renders a request tree as canonical JSON. The root must be serializable
/// (non-empty uuid).
pub fn serialize_request(req: &Request) -> Result<String> {
    if !req.is_serializable() {
        return Err(Error::Uuid(
            "request with an empty uuid cannot be serialized".into(),
        ));
    }
    let value = request_to_json(req)?;
    serde_json::to_string_pretty(&value).map_err(|e| Error::MalformedJson(e.to_string()))
}

/// JSON form of one node. Function and proxy requests become objects with
/// `"uuid"` first (the polymorphic dispatch tag), then the optional
/// `"title"`, then `"args"` as an ordered array. Value requests inline the
/// value itself.
pub fn request_to_json(req: &Request) -> Result<serde_json::Value> {
    match req {
        Request::Value(v) => Ok(value_to_json(v.value())),
        Request::Function(_) | Request::Proxy(_) => {
            let uuid = req
                .uuid()
                .ok_or_else(|| Error::Uuid("request without uuid".into()))?;
            if uuid.is_empty() {
                return Err(Error::Uuid(
                    "subrequest with an empty uuid cannot be serialized".into(),
                ));
            }
            let mut obj = serde_json::Map::new();
            obj.insert("uuid".into(), json!(uuid.as_str()));
            if let Some(title) = req.introspection_title() {
                obj.insert("title".into(), json!(title));
            }
            let args = req
                .subrequests()
                .iter()
                .map(request_to_json)
                .collect::<Result<Vec<_>>>()?;
            obj.insert("args".into(), serde_json::Value::Array(args));
            Ok(serde_json::Value::Object(obj))
        }
    }
}

/// Reconstructs a request from its serialized form, using the registry to
/// resolve uuids to function bindings.
pub fn deserialize_request(registry: &SeriRegistry, seri_req: &str) -> Result<Request> {
    // The scan both validates that a uuid is present and produces a crisp
    // error before full parsing.
    extract_uuid_str(seri_req)?;
    let root: serde_json::Value =
        serde_json::from_str(seri_req).map_err(|e| Error::MalformedJson(e.to_string()))?;
    request_from_json(registry, &root)
}

/// Rebuilds one node. Objects carrying a `"uuid"` string are subrequests;
/// anything else is a literal value.
pub fn request_from_json(registry: &SeriRegistry, json: &serde_json::Value) -> Result<Request> {
    let Some(obj) = json.as_object() else {
        return Ok(rq_value(value_from_json(json)?));
    };
    let Some(uuid_field) = obj.get("uuid") else {
        return Ok(rq_value(value_from_json(json)?));
    };
    let uuid_str = uuid_field
        .as_str()
        .ok_or_else(|| Error::MalformedJson("\"uuid\" must be a string".into()))?;
    let title = match obj.get("title") {
        None => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(Error::MalformedJson("\"title\" must be a string".into()));
        }
    };
    let args_json = obj
        .get("args")
        .ok_or_else(|| Error::MissingField("args".to_owned()))?
        .as_array()
        .ok_or_else(|| Error::MalformedJson("\"args\" must be an array".into()))?;
    let args = args_json
        .iter()
        .map(|a| request_from_json(registry, a))
        .collect::<Result<Vec<_>>>()?;
    registry.create_request(uuid_str, title, args)
}
