// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use crate::core::{
    blob::Blob,
    unique_hash::{
        TAG_BOOL, TAG_FLOAT, TAG_INT, TAG_LIST, TAG_MAP, TAG_NIL, TAG_STRING, UniqueHasher,
        UpdateUniqueHash,
    },
};

/// The self-describing result/argument type of request resolution.
///
/// Calculation functions take and return `Value`s; the content-addressable
/// store holds them. Floats participate in equality and ordering through
/// their IEEE total order so that values can key maps.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Blob(Blob),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Blob(_) => "blob",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Deep size in bytes, as accounted by the memory cache.
    pub fn deep_size(&self) -> u64 {
        match self {
            Self::Nil => 1,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 8,
            Self::Str(s) => s.len() as u64,
            Self::Blob(b) => b.size() as u64,
            Self::List(v) => 8 + v.iter().map(Value::deep_size).sum::<u64>(),
            Self::Map(m) => {
                8 + m
                    .iter()
                    .map(|(k, v)| k.len() as u64 + v.deep_size())
                    .sum::<u64>()
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Nil => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Str(_) => 4,
            Self::Blob(_) => 5,
            Self::List(_) => 6,
            Self::Map(_) => 7,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b) == Ordering::Equal,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Blob(a), Self::Blob(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Self::Nil => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::Blob(b) => b.hash(state),
            Self::List(v) => v.hash(state),
            Self::Map(m) => m.hash(state),
        }
    }
}

impl UpdateUniqueHash for Value {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        match self {
            Self::Nil => hasher.encode_type_tag(TAG_NIL),
            Self::Bool(b) => {
                hasher.encode_type_tag(TAG_BOOL);
                hasher.encode_bytes(&[u8::from(*b)]);
            }
            Self::Int(i) => {
                hasher.encode_type_tag(TAG_INT);
                hasher.encode_bytes(&i.to_le_bytes());
            }
            Self::Float(f) => {
                hasher.encode_type_tag(TAG_FLOAT);
                hasher.encode_bytes(&f.to_bits().to_le_bytes());
            }
            Self::Str(s) => {
                hasher.encode_type_tag(TAG_STRING);
                hasher.encode_bytes(s.as_bytes());
            }
            Self::Blob(b) => b.update_unique_hash(hasher),
            Self::List(v) => {
                // Element count goes into the hash so that differently split
                // aggregates with equal flattened contents cannot collide.
                hasher.encode_type_tag(TAG_LIST);
                hasher.encode_bytes(&(v.len() as u64).to_le_bytes());
                for item in v {
                    item.update_unique_hash(hasher);
                }
            }
            Self::Map(m) => {
                hasher.encode_type_tag(TAG_MAP);
                hasher.encode_bytes(&(m.len() as u64).to_le_bytes());
                for (k, v) in m {
                    hasher.encode_type_tag(TAG_STRING);
                    hasher.encode_bytes(k.as_bytes());
                    v.update_unique_hash(hasher);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Blob(b) => write!(f, "{b}"),
            Self::List(v) => write!(f, "list[{}]", v.len()),
            Self::Map(m) => write!(f, "map[{}]", m.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Blob> for Value {
    fn from(v: Blob) -> Self {
        Self::Blob(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}
