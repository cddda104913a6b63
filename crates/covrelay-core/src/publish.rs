//! Best-effort report publication through a single-owner actor.
//!
//! The [`Publisher`] handle is cloned into every request handler. Reports
//! are queued with `try_send` and published one at a time by a task that
//! exclusively owns the [`Broker`]; delivery failures are logged there and
//! never reach the caller. A full mailbox drops the report.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::PublishError;
use crate::obs;
use crate::report::CoverageReport;

/// Topic exchange reports are published to.
pub const EXCHANGE: &str = "coverage_exchange";

/// Routing key for every report.
pub const ROUTING_KEY: &str = "coverage.report";

/// Default actor mailbox capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A message broker that accepts raw payloads for an exchange.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError>;

    /// Release broker resources once the publisher shuts down.
    async fn close(&self) {}
}

/// Serialise `report` and publish it under [`EXCHANGE`]/[`ROUTING_KEY`].
pub async fn publish_report<B: Broker + ?Sized>(
    broker: &B,
    report: &CoverageReport,
) -> Result<(), PublishError> {
    let payload = report.to_json()?;
    broker.publish(EXCHANGE, ROUTING_KEY, &payload).await
}

/// Handle for fire-and-forget report submission.
#[derive(Clone, Debug, Default)]
pub struct Publisher {
    tx: Option<mpsc::Sender<CoverageReport>>,
}

impl Publisher {
    /// A publisher that discards every report (no broker configured).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the publishing actor, which owns `broker` until every handle
    /// is dropped.
    pub fn spawn<B: Broker>(broker: B, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run(broker, rx).in_current_span());
        Self { tx: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `report` for publication without waiting for delivery.
    pub fn submit(&self, report: CoverageReport) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(report) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "mailbox full",
                mpsc::error::TrySendError::Closed(_) => "publisher stopped",
            };
            obs::emit_report_dropped(reason);
        }
    }
}

async fn run<B: Broker>(broker: B, mut rx: mpsc::Receiver<CoverageReport>) {
    while let Some(report) = rx.recv().await {
        match publish_report(&broker, &report).await {
            Ok(()) => obs::emit_report_published(&report),
            Err(e) => obs::emit_report_publish_failed(&report, &e),
        }
    }
    broker.close().await;
}
