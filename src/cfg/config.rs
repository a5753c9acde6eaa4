// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, fs, path::Path};

use serde_json::json;

use crate::core::errors::{Error, Result};

/// Well-known configuration keys. Each layer interprets the keys it
/// understands and passes the map on unchanged.
pub mod config_keys {
    /// (Optional number) Max bytes of evictable action-cache records.
    pub const MEMORY_CACHE_UNUSED_SIZE_LIMIT: &str = "memory_cache/unused_size_limit";
    /// (Optional string) Chooses the secondary storage plugin.
    pub const SECONDARY_CACHE_FACTORY: &str = "secondary_cache/factory";
    /// (Optional string) Directory for the local disk storage plugin.
    pub const DISK_CACHE_DIRECTORY: &str = "disk_cache/directory";
    /// (Optional number) Size cap for the local disk storage plugin.
    pub const DISK_CACHE_SIZE_LIMIT: &str = "disk_cache/size_limit";
    /// (Optional string) Directory where blob files live.
    pub const BLOB_CACHE_DIRECTORY: &str = "blob_cache/directory";
    /// (Optional string) Base URL of the HTTP storage plugin.
    pub const HTTP_CACHE_URL: &str = "http_cache/url";
    /// (Optional number) Concurrency bound for blocking network I/O.
    pub const HTTP_CONCURRENCY: &str = "http_concurrency";
    /// (Optional number) Concurrency bound for root-level async resolutions.
    pub const ASYNC_CONCURRENCY: &str = "async_concurrency";
    /// (Optional number) Port of the RPC server for remote resolution.
    pub const RPCLIB_PORT_NUMBER: &str = "rpclib/port_number";
    /// (Optional bool) Whether the RPC server runs as a contained subprocess.
    pub const RPCLIB_CONTAINED: &str = "rpclib/contained";
    /// (Optional bool) Enables deterministic test paths.
    pub const TESTING: &str = "testing";
}

/// A configuration value: string, unsigned number or boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Str(String),
    Number(u64),
    Bool(bool),
}

/// An open-ended key-value configuration map.
///
/// Keys are `/`-separated paths (`"memory_cache/unused_size_limit"`); nested
/// TOML tables and JSON objects flatten onto that shape. Typed accessors
/// report a [`Error::Config`] naming the key on kind mismatches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    map: BTreeMap<String, ConfigValue>,
}

impl ServiceConfig {
    pub fn new(map: BTreeMap<String, ConfigValue>) -> Self {
        Self { map }
    }

    /// Parses a TOML document, flattening nested tables into `/` keys.
    pub fn from_toml_string(text: &str) -> Result<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| Error::Config(format!("bad TOML config: {e}")))?;
        let mut map = BTreeMap::new();
        flatten_toml_table(&table, "", &mut map)?;
        Ok(Self { map })
    }

    /// Parses a JSON object, flattening nested objects into `/` keys.
    pub fn from_json_string(text: &str) -> Result<Self> {
        let root: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("bad JSON config: {e}")))?;
        let serde_json::Value::Object(obj) = root else {
            return Err(Error::Config("config root must be an object".into()));
        };
        let mut map = BTreeMap::new();
        flatten_json_object(&obj, "", &mut map)?;
        Ok(Self { map })
    }

    /// Loads a config file, picking the parser by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_string(&text),
            Some("json") => Self::from_json_string(&text),
            other => Err(Error::Config(format!(
                "unsupported config extension {other:?} for {}",
                path.display()
            ))),
        }
    }

    /// Flat JSON rendering, for shipping a config over RPC.
    pub fn to_json_string(&self) -> String {
        let mut obj = serde_json::Map::new();
        for (k, v) in &self.map {
            let jv = match v {
                ConfigValue::Str(s) => json!(s),
                ConfigValue::Number(n) => json!(n),
                ConfigValue::Bool(b) => json!(b),
            };
            obj.insert(k.clone(), jv);
        }
        serde_json::Value::Object(obj).to_string()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.map.insert(key.into(), value);
    }

    pub fn get_optional_string(&self, key: &str) -> Result<Option<String>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(bad_type(key, "string")),
        }
    }

    pub fn get_mandatory_string(&self, key: &str) -> Result<String> {
        self.get_optional_string(key)?.ok_or_else(|| missing(key))
    }

    pub fn get_string_or_default(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_optional_string(key)?
            .unwrap_or_else(|| default.to_owned()))
    }

    pub fn get_optional_number(&self, key: &str) -> Result<Option<u64>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(ConfigValue::Number(n)) => Ok(Some(*n)),
            Some(_) => Err(bad_type(key, "number")),
        }
    }

    pub fn get_mandatory_number(&self, key: &str) -> Result<u64> {
        self.get_optional_number(key)?.ok_or_else(|| missing(key))
    }

    pub fn get_number_or_default(&self, key: &str, default: u64) -> Result<u64> {
        Ok(self.get_optional_number(key)?.unwrap_or(default))
    }

    pub fn get_optional_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(ConfigValue::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(bad_type(key, "bool")),
        }
    }

    pub fn get_mandatory_bool(&self, key: &str) -> Result<bool> {
        self.get_optional_bool(key)?.ok_or_else(|| missing(key))
    }

    pub fn get_bool_or_default(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get_optional_bool(key)?.unwrap_or(default))
    }
}

fn bad_type(key: &str, wanted: &str) -> Error {
    Error::Config(format!("bad type for config \"{key}\" (wanted {wanted})"))
}

fn missing(key: &str) -> Error {
    Error::Config(format!("missing mandatory config \"{key}\""))
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}/{key}")
    }
}

fn flatten_toml_table(
    table: &toml::Table,
    prefix: &str,
    out: &mut BTreeMap<String, ConfigValue>,
) -> Result<()> {
    for (key, value) in table {
        let full = join_key(prefix, key);
        match value {
            toml::Value::String(s) => {
                out.insert(full, ConfigValue::Str(s.clone()));
            }
            toml::Value::Integer(i) => {
                let n = u64::try_from(*i)
                    .map_err(|_| Error::Config(format!("negative number for config \"{full}\"")))?;
                out.insert(full, ConfigValue::Number(n));
            }
            toml::Value::Boolean(b) => {
                out.insert(full, ConfigValue::Bool(*b));
            }
            toml::Value::Table(inner) => flatten_toml_table(inner, &full, out)?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported value type for config \"{full}\": {other}"
                )));
            }
        }
    }
    Ok(())
}

fn flatten_json_object(
    obj: &serde_json::Map<String, serde_json::Value>,
    prefix: &str,
    out: &mut BTreeMap<String, ConfigValue>,
) -> Result<()> {
    for (key, value) in obj {
        let full = join_key(prefix, key);
        match value {
            serde_json::Value::String(s) => {
                out.insert(full, ConfigValue::Str(s.clone()));
            }
            serde_json::Value::Number(n) => {
                let n = n
                    .as_u64()
                    .ok_or_else(|| Error::Config(format!("bad number for config \"{full}\"")))?;
                out.insert(full, ConfigValue::Number(n));
            }
            serde_json::Value::Bool(b) => {
                out.insert(full, ConfigValue::Bool(*b));
            }
            serde_json::Value::Object(inner) => flatten_json_object(inner, &full, out)?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported value type for config \"{full}\": {other}"
                )));
            }
        }
    }
    Ok(())
}
