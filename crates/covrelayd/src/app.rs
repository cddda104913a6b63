//! Process bootstrap.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use cover_registry::{FileStore, Registry};
use covrelay_core::{AmqpBroker, Provenance, Publisher, RepoIdentityResolver};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::lifecycle::InternalServer;
use crate::proxy::Relay;

/// Start every component in order and serve until Ctrl-C.
///
/// Provenance problems only degrade the reports. A broker that cannot be
/// reached, an unreadable persistence file or a listener that cannot be
/// bound abort startup.
pub async fn run(config: Config) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let resolver = match RepoIdentityResolver::new(&config.github_api, config.github_token()) {
        Ok(resolver) => Some(resolver),
        Err(e) => {
            warn!(error = %e, "repository id lookup disabled");
            None
        }
    };
    let provenance = Provenance::discover(&cwd, resolver.as_ref()).await;

    let publisher = match config.broker_url() {
        Some(url) => {
            let broker = AmqpBroker::connect(url)
                .await
                .map_err(RelayError::BrokerUnavailable)?;
            Publisher::spawn(broker, config.publish_queue.max(1))
        }
        None => {
            info!("no broker configured, coverage reports will not be published");
            Publisher::disabled()
        }
    };

    let store = FileStore::open(&config.local_persistence).with_context(|| {
        format!(
            "failed to open registry store {}",
            config.local_persistence.display()
        )
    })?;
    let registry = Registry::new(store, config.registry_settings())
        .context("failed to build coverage registry")?;
    let internal = InternalServer::start(registry).await?;

    let relay = Relay::new(
        internal.base_url(),
        provenance,
        publisher,
        config.relay_settings(),
    )?;
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(
        listen = %listener.local_addr()?,
        internal = %internal.base_url(),
        "covrelayd listening"
    );

    serve(listener, relay, shutdown_signal())
        .await
        .context("public server failed")?;
    info!("covrelayd stopped");
    Ok(())
}

/// Serve the public router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, relay: Relay, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        relay
            .router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c, shutting down");
        return;
    }
    info!("shutdown requested");
}
