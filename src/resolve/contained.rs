// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Contained execution: delegating a resolution to a subprocess running the
//! RPC server, so a misbehaving calculation cannot take the main process
//! down with it.

use std::{ffi::OsString, path::PathBuf, sync::Arc, time::Duration};

use rand::RngExt;
use tokio::{
    net::TcpStream,
    process::Command,
    sync::Mutex,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    cfg::config::ServiceConfig,
    core::errors::{Error, Result},
    remote::{
        proxy::{RemoteProxy, SerializedResult},
        wait_async::wait_until_finished,
    },
};

const READINESS_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the client proxy talking to a server on the given localhost port.
pub type ProxyFactory = dyn Fn(u16) -> Result<Arc<dyn RemoteProxy>> + Send + Sync;

fn ephemeral_port() -> u16 {
    rand::rng().random_range(49152..=65535)
}

/// Runs one RPC-server subprocess and delegates resolutions to it.
///
/// The controller starts the server binary on a fresh ephemeral port, waits
/// for it to accept connections, and then drives it through the standard
/// proxy interface. RPC timeouts are fatal for the subprocess; the child is
/// killed when the controller is dropped. A healthy controller can be
/// returned to a [`ContainedProxyPool`] for reuse.
pub struct ContainedController {
    child: tokio::process::Child,
    proxy: Arc<dyn RemoteProxy>,
    port: u16,
}

impl ContainedController {
    /// Spawns `server_path` with `--port <port>` plus `extra_args` and waits
    /// until the port accepts connections.
    pub async fn start(
        server_path: PathBuf,
        extra_args: Vec<OsString>,
        make_proxy: &ProxyFactory,
    ) -> Result<Self> {
        let port = ephemeral_port();
        info!("starting contained server {} on port {port}", server_path.display());
        let child = Command::new(&server_path)
            .arg("--port")
            .arg(port.to_string())
            .args(extra_args)
            .kill_on_drop(true)
            .spawn()?;
        wait_until_listening(port).await?;
        let proxy = make_proxy(port)?;
        Ok(Self { child, proxy, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn proxy(&self) -> &Arc<dyn RemoteProxy> {
        &self.proxy
    }

    /// Delegates an async resolution to the subprocess. A timed-out call is
    /// treated as fatal for this subprocess: the caller should drop the
    /// controller instead of pooling it.
    pub async fn resolve_async(
        &self,
        config: ServiceConfig,
        seri_req: String,
    ) -> Result<SerializedResult> {
        let proxy = &*self.proxy;
        let outcome = timeout(CALL_TIMEOUT, async {
            let aid = proxy.submit_async(config, seri_req).await?;
            let result = async {
                wait_until_finished(proxy, aid).await?;
                proxy.get_async_response(aid).await
            }
            .await;
            if let Err(e) = proxy.finish_async(aid).await {
                warn!("finish_async({aid}) on contained server failed: {e}");
            }
            result
        })
        .await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Remote {
                message: format!("contained server on port {} timed out", self.port),
                retryable: false,
            }),
        }
    }

    /// Terminates the subprocess.
    pub async fn kill(mut self) {
        debug!("killing contained server on port {}", self.port);
        if let Err(e) = self.child.kill().await {
            warn!("cannot kill contained server: {e}");
        }
    }
}

async fn wait_until_listening(port: u16) -> Result<()> {
    let deadline = tokio::time::Instant::now() + READINESS_TIMEOUT;
    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(_) => return Ok(()),
            Err(_) if tokio::time::Instant::now() < deadline => {
                sleep(Duration::from_millis(50)).await;
            }
            Err(e) => {
                return Err(Error::Remote {
                    message: format!("contained server on port {port} not reachable: {e}"),
                    retryable: false,
                });
            }
        }
    }
}

/// Pool of idle contained subprocesses, so consecutive contained
/// resolutions reuse a warm server instead of paying startup cost.
#[derive(Default)]
pub struct ContainedProxyPool {
    idle: Mutex<Vec<ContainedController>>,
}

impl ContainedProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an idle controller, if any; otherwise the caller starts one.
    pub async fn checkout(&self) -> Option<ContainedController> {
        self.idle.lock().await.pop()
    }

    /// Returns a healthy controller for reuse.
    pub async fn checkin(&self, controller: ContainedController) {
        self.idle.lock().await.push(controller);
    }

    /// Kills every pooled subprocess.
    pub async fn shutdown(&self) {
        let controllers = std::mem::take(&mut *self.idle.lock().await);
        for controller in controllers {
            controller.kill().await;
        }
    }
}
