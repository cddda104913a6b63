//! In-memory brokers for tests.
//!
//! `RecordingBroker` captures every publish; `FailingBroker` rejects every
//! publish and counts the attempts. Both are cheap to clone so a test can
//! keep a handle while the publisher actor owns another.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::publish::Broker;
use crate::report::CoverageReport;

/// A message captured by [`RecordingBroker`].
#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl Published {
    /// Decode the payload back into a report. Panics on malformed JSON.
    pub fn report(&self) -> CoverageReport {
        serde_json::from_slice(&self.payload).expect("published payload is a CoverageReport")
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingBroker {
    published: Arc<Mutex<Vec<Published>>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    /// Poll until at least `count` messages arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Published> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let published = self.published();
            if published.len() >= count || tokio::time::Instant::now() >= deadline {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        self.published.lock().unwrap().push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailingBroker {
    attempts: Arc<AtomicUsize>,
}

impl FailingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for FailingBroker {
    async fn publish(
        &self,
        _exchange: &str,
        _routing_key: &str,
        _payload: &[u8],
    ) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::Publish("broker rejected message".to_string()))
    }
}
