// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    any::Any,
    cmp::Ordering,
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use crate::core::{
    unique_hash::{TAG_ID_TUPLE, UniqueDigest, UniqueHasher, UpdateUniqueHash},
    value::Value,
};

/// A request's structural identity: supports by-value equality, ordering, a
/// cheap 64-bit hash for map keys and a cryptographic hash for digests.
pub trait Id: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    /// Disambiguates between different `Id` implementations when ordering.
    fn type_rank(&self) -> u8;

    fn eq_id(&self, other: &dyn Id) -> bool;

    /// Strict-weak ordering among ids of the same implementation.
    fn lt_id(&self, other: &dyn Id) -> bool;

    fn hash64(&self) -> u64;

    fn update_hash(&self, hasher: &mut UniqueHasher);
}

/// Shared handle to an [`Id`]. Equality, ordering and hashing delegate to
/// the identity's value, so `CapturedId` can key maps. The handle outlives
/// the request it was captured from.
#[derive(Clone, Debug)]
pub struct CapturedId(Arc<dyn Id>);

impl CapturedId {
    pub fn new(id: impl Id) -> Self {
        Self(Arc::new(id))
    }

    pub fn as_id(&self) -> &dyn Id {
        &*self.0
    }

    /// Cryptographic digest over the identity.
    pub fn unique_digest(&self) -> UniqueDigest {
        let mut hasher = UniqueHasher::new();
        self.0.update_hash(&mut hasher);
        hasher.finish()
    }

    /// Hex digest string; this is the secondary-storage key format.
    pub fn unique_string(&self) -> String {
        self.unique_digest().to_hex()
    }
}

impl PartialEq for CapturedId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_id(other.as_id())
    }
}

impl Eq for CapturedId {}

impl PartialOrd for CapturedId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CapturedId {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.0.type_rank().cmp(&other.0.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        if self.0.eq_id(other.as_id()) {
            Ordering::Equal
        } else if self.0.lt_id(other.as_id()) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

impl Hash for CapturedId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash64());
    }
}

/// Identity of a literal value leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueId(pub Value);

impl Id for ValueId {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_rank(&self) -> u8 {
        0
    }

    fn eq_id(&self, other: &dyn Id) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| self.0 == o.0)
    }

    fn lt_id(&self, other: &dyn Id) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| self.0 < o.0)
    }

    fn hash64(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.0.hash(&mut h);
        h.finish()
    }

    fn update_hash(&self, hasher: &mut UniqueHasher) {
        self.0.update_unique_hash(hasher);
    }
}

/// Identity of a function or proxy request: the finalized uuid string plus
/// the identities of the arguments, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId {
    uuid: String,
    args: Vec<CapturedId>,
}

impl RequestId {
    pub fn new(uuid: String, args: Vec<CapturedId>) -> Self {
        Self { uuid, args }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn args(&self) -> &[CapturedId] {
        &self.args
    }
}

impl Id for RequestId {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_rank(&self) -> u8 {
        1
    }

    fn eq_id(&self, other: &dyn Id) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| self.uuid == o.uuid && self.args == o.args)
    }

    fn lt_id(&self, other: &dyn Id) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| (&self.uuid, &self.args) < (&o.uuid, &o.args))
    }

    fn hash64(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.uuid.hash(&mut h);
        for arg in &self.args {
            h.write_u64(arg.as_id().hash64());
        }
        h.finish()
    }

    fn update_hash(&self, hasher: &mut UniqueHasher) {
        hasher.encode_type_tag(TAG_ID_TUPLE);
        self.uuid.update_unique_hash(hasher);
        // Argument count is part of the hash; see the aggregate rule in
        // `core::unique_hash`.
        hasher.encode_bytes(&(self.args.len() as u64).to_le_bytes());
        for arg in &self.args {
            arg.as_id().update_hash(hasher);
        }
    }
}

/// Hex digest string for any identity.
pub fn get_unique_string(id: &dyn Id) -> String {
    let mut hasher = UniqueHasher::new();
    id.update_hash(&mut hasher);
    hasher.finish_hex()
}
