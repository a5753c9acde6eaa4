// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Errors surfaced by the runtime.
///
/// The enum is `Clone` because resolution results travel through shared
/// single-flight futures, where every awaiter receives its own copy of the
/// outcome. Foreign error types are therefore captured as strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Generic uuid misuse (finalizing twice, extending a finalized uuid...).
    #[error("uuid error: {0}")]
    Uuid(String),

    /// A serialized request references a uuid absent from the registry.
    #[error("no resolver registered for uuid {0}")]
    UnregisteredUuid(String),

    /// Two registrations for one uuid disagree on their function binding.
    #[error("conflicting registrations for uuid {0}")]
    UuidCollision(String),

    /// A uuid base string is empty or contains the `+` extension marker.
    #[error("invalid uuid base {0:?}")]
    InvalidUuidBase(String),

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("missing field {0:?}")]
    MissingField(String),

    /// An error that occurred on a peer, or while talking to one.
    #[error("remote error: {message}")]
    Remote { message: String, retryable: bool },

    /// Cooperative cancellation observed at a suspension point.
    #[error("operation cancelled")]
    AsyncCancelled,

    /// An asynchronous resolution ended in error on the resolving side.
    #[error("async resolution failed: {0}")]
    AsyncError(String),

    #[error("no async operation with id {0}")]
    BadAsyncId(u64),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("HTTP request failure: {0}")]
    HttpRequestFailure(String),

    #[error("bad HTTP status code {0}")]
    BadHttpStatusCode(u16),

    #[error("i/o error: {0}")]
    Io(String),

    /// Value encode/decode failure (msgpack or JSON payloads).
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Exception thrown by a user calculation function.
    #[error("calculation failed: {0}")]
    Calculation(String),
}

impl Error {
    /// Whether a retrier may consider this error transient.
    pub fn is_retryable_remote(&self) -> bool {
        matches!(self, Self::Remote { retryable: true, .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
