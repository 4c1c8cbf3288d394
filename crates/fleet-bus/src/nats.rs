use std::time::Duration;

use async_nats::client::RequestErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::transport::{BusMessage, Inbox, Transport, INBOX_CAPACITY};
use crate::Result;

/// [`Transport`] over a NATS connection.
#[derive(Clone)]
pub struct NatsTransport {
    client: async_nats::Client,
}

impl NatsTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        info!(url, "connected to message bus");
        Ok(Self { client })
    }

    pub fn from_client(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        debug!(subject, bytes = payload.len(), ?timeout, "bus request");
        let request = async_nats::Request::new()
            .payload(payload)
            .timeout(Some(timeout));
        match self.client.send_request(subject.to_string(), request).await {
            Ok(message) => Ok(message.payload),
            Err(e) => {
                let err = match e.kind() {
                    RequestErrorKind::NoResponders => BusError::NoResponders(subject.to_string()),
                    RequestErrorKind::TimedOut => BusError::TimedOut {
                        subject: subject.to_string(),
                        after: timeout,
                    },
                    _ => BusError::Request {
                        subject: subject.to_string(),
                        reason: e.to_string(),
                    },
                };
                warn!(subject, error = %err, "bus request failed");
                Err(err)
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        debug!(subject, bytes = payload.len(), "bus publish");
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        self.client.flush().await.map_err(|e| BusError::Publish {
            subject: subject.to_string(),
            reason: e.to_string(),
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<Inbox> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        info!(subject, "subscribed");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let pattern = subject.to_string();
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let forwarded = BusMessage {
                    subject: message.subject.to_string(),
                    payload: message.payload,
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
            debug!(subject = %pattern, "subscription closed");
        });
        Ok(rx)
    }
}
