// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod function;
pub mod request;
pub mod retry;
pub mod serialization;
pub mod uuid;

use crate::core::errors::{Error, Result};

/// How aggressively a request's result is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CachingLevel {
    /// Not cached at all.
    #[default]
    None,
    /// Cached in the in-memory action cache only.
    Memory,
    /// Cached in memory and in secondary storage.
    Full,
}

impl CachingLevel {
    /// The uuid extension appended at finalization.
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "+none",
            Self::Memory => "+mem",
            Self::Full => "+full",
        }
    }

    /// Recovers the level from a finalized uuid string.
    pub fn from_uuid_str(uuid: &str) -> Result<Self> {
        for level in [Self::None, Self::Memory, Self::Full] {
            if uuid
                .split('+')
                .any(|ext| format!("+{ext}") == level.extension())
            {
                return Ok(level);
            }
        }
        Err(Error::Uuid(format!("no caching level in uuid {uuid}")))
    }
}
