// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use crate::{
    core::{
        errors::{Error, Result},
        unique_hash::{UniqueHasher, UpdateUniqueHash},
    },
    requests::CachingLevel,
};

/// Build-version suffix folded into every uuid, so that uuids from
/// different builds never alias when the implementation changed.
pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stable string identifying a request class and its function binding.
///
/// A uuid is built from a user-chosen base plus a version suffix
/// (`base+version`). `+<level>` and `+flattened` extensions are appended at
/// finalization, after which the uuid is immutable. An empty uuid is legal
/// but such a request can be neither serialized nor disk-cached.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestUuid {
    str_: String,
    level: Option<CachingLevel>,
    flattened: bool,
    finalized: bool,
}

impl RequestUuid {
    /// The empty uuid: not serializable, not disk-cacheable.
    pub fn empty() -> Self {
        Self {
            str_: String::new(),
            level: None,
            flattened: false,
            finalized: true,
        }
    }

    /// Combines `base` with the crate build version.
    ///
    /// The base must be unique within the application, non-empty, and must
    /// not contain `+` (reserved for extensions).
    pub fn new(base: &str) -> Result<Self> {
        Self::with_version(base, BUILD_VERSION)
    }

    /// Combines `base` with a caller-managed version. The caller promises to
    /// bump the version whenever the request's observable behavior changes.
    pub fn with_version(base: &str, version: &str) -> Result<Self> {
        check_base(base)?;
        Ok(Self {
            str_: format!("{base}+{version}"),
            level: None,
            flattened: false,
            finalized: false,
        })
    }

    /// Wraps an already-complete uuid string, as read from a serialized
    /// request.
    pub fn from_complete(complete: String) -> Self {
        Self {
            str_: complete,
            level: None,
            flattened: false,
            finalized: true,
        }
    }

    /// Combines the uuids of a main request and a subrequest.
    pub fn combined(main: &Self, sub: &Self) -> Result<Self> {
        Self::with_version(
            &format!("{}/{}", base_of(&main.str_), base_of(&sub.str_)),
            BUILD_VERSION,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.str_.is_empty()
    }

    /// Whether a request with this uuid can be stored in secondary storage.
    pub fn disk_cacheable(&self) -> bool {
        !self.is_empty()
    }

    /// Whether a request with this uuid can be serialized.
    pub fn serializable(&self) -> bool {
        !self.is_empty()
    }

    pub fn set_level(mut self, level: CachingLevel) -> Result<Self> {
        self.check_not_finalized()?;
        self.level = Some(level);
        Ok(self)
    }

    pub fn set_flattened(mut self) -> Result<Self> {
        self.check_not_finalized()?;
        if self.flattened {
            return Err(Error::Uuid("uuid already flattened".into()));
        }
        self.flattened = true;
        Ok(self)
    }

    /// Appends the recorded extensions and freezes the uuid.
    pub fn finalize(mut self) -> Self {
        if self.finalized {
            return self;
        }
        if let Some(level) = self.level {
            self.str_.push_str(level.extension());
        }
        if self.flattened {
            self.str_.push_str("+flattened");
        }
        self.finalized = true;
        self
    }

    /// Recovers an editable uuid carrying the same base and flags.
    pub fn clone_unfinalized(&self) -> Result<Self> {
        let mut res = Self::with_version(base_of(&self.str_), version_of(&self.str_))?;
        res.level = self.level;
        res.flattened = self.flattened;
        Ok(res)
    }

    /// The full uuid string. Extensions are present only after
    /// finalization.
    pub fn as_str(&self) -> &str {
        &self.str_
    }

    fn check_not_finalized(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::Uuid(format!("uuid {} already finalized", self.str_)));
        }
        Ok(())
    }
}

impl fmt::Display for RequestUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.str_)
    }
}

impl UpdateUniqueHash for RequestUuid {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        self.str_.update_unique_hash(hasher);
    }
}

fn check_base(base: &str) -> Result<()> {
    if base.is_empty() {
        return Err(Error::InvalidUuidBase(base.to_owned()));
    }
    if base.contains('+') {
        return Err(Error::InvalidUuidBase(base.to_owned()));
    }
    Ok(())
}

fn base_of(s: &str) -> &str {
    s.split('+').next().unwrap_or(s)
}

fn version_of(s: &str) -> &str {
    s.split('+').nth(1).unwrap_or(BUILD_VERSION)
}
