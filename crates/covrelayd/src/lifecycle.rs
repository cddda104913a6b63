//! Internal coverage server lifecycle.
//!
//! The wrapped engine runs on an ephemeral loopback port in its own task.
//! Only its base URL leaves this module; the listener and task stay owned
//! by [`InternalServer`]. The task is not supervised: once it stops, proxy
//! calls fail until the process is restarted.

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use axum::Router;
use cover_registry::Registry;
use covrelay_core::obs;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::RelayError;

/// A coverage engine the relay can front.
#[async_trait]
pub trait CoverageServer: Send + Sync + 'static {
    /// The engine's HTTP routes.
    fn route(&self) -> Router;

    /// Serve [`CoverageServer::route`] on `listener` until it fails.
    async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        axum::serve(
            listener,
            self.route()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}

#[async_trait]
impl CoverageServer for Registry {
    fn route(&self) -> Router {
        self.router()
    }
}

/// Handle to the running internal server. Dropping it stops the server.
#[derive(Debug)]
pub struct InternalServer {
    base_url: String,
    task: JoinHandle<()>,
}

impl InternalServer {
    /// Bind `127.0.0.1:0` and start `server` on it in the background.
    pub async fn start<S: CoverageServer>(server: S) -> Result<Self, RelayError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(RelayError::ListenerUnavailable)?;
        let addr = listener
            .local_addr()
            .map_err(RelayError::ListenerUnavailable)?;
        let base_url = format!("http://{addr}");

        let task_url = base_url.clone();
        let task = tokio::spawn(async move {
            let result = server.run(listener).await;
            obs::emit_internal_server_stopped(
                &task_url,
                result.as_ref().err().map(|e| e as &dyn std::fmt::Display),
            );
        });

        obs::emit_internal_server_started(&base_url);
        Ok(Self { base_url, task })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for InternalServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
