//! In-process bus.
//!
//! Agents are simulated by responders registered per subject pattern. A
//! subject with no responder behaves like an offline agent; a responder that
//! returns `None` behaves like an agent that received the command and never
//! answered.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::subject::subject_matches;
use crate::transport::{BusMessage, Inbox, Transport, INBOX_CAPACITY};
use crate::Result;

type Responder = Arc<dyn Fn(&str, Bytes) -> Option<Bytes> + Send + Sync>;

#[derive(Default)]
struct Inner {
    responders: Vec<(String, Responder)>,
    subscribers: Vec<(String, mpsc::Sender<BusMessage>)>,
    delivered: Vec<BusMessage>,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer requests matching `pattern`. Later registrations take precedence.
    pub fn respond<F>(&self, pattern: &str, responder: F)
    where
        F: Fn(&str, Bytes) -> Option<Bytes> + Send + Sync + 'static,
    {
        self.lock()
            .responders
            .push((pattern.to_string(), Arc::new(responder)));
    }

    /// Drop every responder registered under `pattern`.
    pub fn go_offline(&self, pattern: &str) {
        self.lock().responders.retain(|(p, _)| p != pattern);
    }

    /// Every message that reached a responder or was published, in order.
    pub fn delivered(&self) -> Vec<BusMessage> {
        self.lock().delivered.clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.lock().delivered.len()
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        let responder = {
            let mut inner = self.lock();
            let found = inner
                .responders
                .iter()
                .rev()
                .find(|(p, _)| subject_matches(p, subject))
                .map(|(_, r)| Arc::clone(r));
            if found.is_some() {
                inner.delivered.push(BusMessage {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                });
            }
            found
        };
        let Some(responder) = responder else {
            return Err(BusError::NoResponders(subject.to_string()));
        };
        match responder(subject, payload) {
            Some(reply) => Ok(reply),
            None => {
                tokio::time::sleep(timeout).await;
                Err(BusError::TimedOut {
                    subject: subject.to_string(),
                    after: timeout,
                })
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let message = BusMessage {
            subject: subject.to_string(),
            payload,
        };
        let targets: Vec<mpsc::Sender<BusMessage>> = {
            let mut inner = self.lock();
            inner.delivered.push(message.clone());
            inner.subscribers.retain(|(_, tx)| !tx.is_closed());
            inner
                .subscribers
                .iter()
                .filter(|(p, _)| subject_matches(p, subject))
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in targets {
            // A subscriber that went away mid-publish is not an error.
            let _ = tx.send(message.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Inbox> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.lock().subscribers.push((subject.to_string(), tx));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_without_responder_is_no_responders() {
        let bus = MemoryBus::new();
        let err = bus
            .request("agent.report.A1", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoResponders(_)));
        assert!(!err.maybe_delivered());
        assert_eq!(bus.delivered_count(), 0);
    }

    #[tokio::test]
    async fn responder_reply_is_returned() {
        let bus = MemoryBus::new();
        bus.respond("agent.bitlocker.*", |_, payload| Some(payload));
        let reply = bus
            .request(
                "agent.bitlocker.A1",
                Bytes::from_static(b"{\"Operation\":\"status\"}"),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(&reply[..], b"{\"Operation\":\"status\"}");
        assert_eq!(bus.delivered()[0].subject, "agent.bitlocker.A1");
    }

    #[tokio::test]
    async fn silent_responder_times_out() {
        let bus = MemoryBus::new();
        bus.respond("agent.enable.A1", |_, _| None);
        let err = bus
            .request("agent.enable.A1", Bytes::new(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.maybe_delivered());
        assert_eq!(bus.delivered_count(), 1);
    }

    #[tokio::test]
    async fn go_offline_removes_responder() {
        let bus = MemoryBus::new();
        bus.respond("agent.enable.A1", |_, _| Some(Bytes::new()));
        bus.go_offline("agent.enable.A1");
        assert!(matches!(
            bus.request("agent.enable.A1", Bytes::new(), Duration::from_secs(1))
                .await,
            Err(BusError::NoResponders(_))
        ));
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let bus = MemoryBus::new();
        let mut results = bus.subscribe("agent.package.result.*").await.unwrap();
        let mut other = bus.subscribe("agent.other.*").await.unwrap();

        bus.publish("agent.package.result.A1", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let msg = results.recv().await.unwrap();
        assert_eq!(msg.subject, "agent.package.result.A1");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_succeeds() {
        let bus = MemoryBus::new();
        bus.publish("agent.installpackage.A1", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(bus.delivered_count(), 1);
    }
}
