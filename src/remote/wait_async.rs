// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tracing::debug;

use crate::{
    context::{AsyncId, AsyncStatus},
    core::errors::{Error, Result},
    remote::proxy::RemoteProxy,
};

const MAX_POLL_DELAY_MILLIS: u64 = 100;

/// Polls a peer until the status of `remote_id` satisfies `matcher`.
///
/// The poll delay backs off from 1 ms, capped at 100 ms. A terminal
/// `Cancelled` or `Error` status observed before the matcher is satisfied
/// turns into the corresponding error (fetching the peer's message for the
/// latter).
pub async fn wait_until_async_status_matches(
    proxy: &dyn RemoteProxy,
    remote_id: AsyncId,
    matcher: impl Fn(AsyncStatus) -> bool,
) -> Result<()> {
    let mut sleep_millis = 1u64;
    loop {
        let status = proxy.get_async_status(remote_id).await?;
        if matcher(status) {
            debug!("remote async {remote_id}: status {status}, DONE");
            return Ok(());
        }
        debug!("remote async {remote_id}: status {status}, NOT done");
        match status {
            AsyncStatus::Cancelled => {
                return Err(Error::AsyncCancelled);
            }
            AsyncStatus::Error => {
                let message = proxy.get_async_error_message(remote_id).await?;
                return Err(Error::AsyncError(message));
            }
            _ => {}
        }
        tokio::time::sleep(Duration::from_millis(sleep_millis)).await;
        sleep_millis = ((sleep_millis + 1) * 3 / 2).min(MAX_POLL_DELAY_MILLIS);
    }
}

/// Waits for the root of a submitted resolution to finish.
pub async fn wait_until_finished(proxy: &dyn RemoteProxy, remote_id: AsyncId) -> Result<()> {
    wait_until_async_status_matches(proxy, remote_id, |s| s == AsyncStatus::Finished).await
}
