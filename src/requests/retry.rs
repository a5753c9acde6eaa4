// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tracing::{error, info};

use crate::core::errors::{Error, Result};

/// Decides whether a failed attempt should be retried, and after how long.
///
/// Returning `Ok(delay)` schedules a retry; returning the error rethrows it
/// to the caller.
pub trait Retrier: Send + Sync {
    fn handle_error(&self, attempt: u32, error: &Error) -> Result<Duration>;
}

/// Retries HTTP request failures only, with exponential backoff
/// `base * 4^attempt` and a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct DefaultRetrier {
    base_millis: u64,
    max_attempts: u32,
}

impl DefaultRetrier {
    pub fn new(base_millis: u64, max_attempts: u32) -> Self {
        Self {
            base_millis,
            max_attempts,
        }
    }
}

impl Default for DefaultRetrier {
    fn default() -> Self {
        Self::new(100, 9)
    }
}

fn backoff(base_millis: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_millis << (attempt * 2))
}

impl Retrier for DefaultRetrier {
    fn handle_error(&self, attempt: u32, error: &Error) -> Result<Duration> {
        if !matches!(
            error,
            Error::HttpRequestFailure(_) | Error::BadHttpStatusCode(_)
        ) {
            return Err(error.clone());
        }
        if attempt + 1 >= self.max_attempts {
            error!("failed on attempt {attempt}: {error}; will not retry");
            return Err(error.clone());
        }
        let delay = backoff(self.base_millis, attempt);
        info!(
            "failed on attempt {attempt}: {error}; will retry after {}ms",
            delay.as_millis()
        );
        Ok(delay)
    }
}

/// Retries remote errors whose `retryable` flag is set.
#[derive(Debug, Clone, Default)]
pub struct ProxyRetrier;

impl ProxyRetrier {
    const BASE_MILLIS: u64 = 100;
    const MAX_ATTEMPTS: u32 = 9;
}

impl Retrier for ProxyRetrier {
    fn handle_error(&self, attempt: u32, error: &Error) -> Result<Duration> {
        if !error.is_retryable_remote() {
            return Err(error.clone());
        }
        if attempt + 1 >= Self::MAX_ATTEMPTS {
            error!("failed on attempt {attempt}: {error}; will not retry");
            return Err(error.clone());
        }
        let delay = backoff(Self::BASE_MILLIS, attempt);
        info!(
            "failed on attempt {attempt}: {error}; will retry after {}ms",
            delay.as_millis()
        );
        Ok(delay)
    }
}
