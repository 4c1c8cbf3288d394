use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// One message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Messages delivered to a subscription. Closed when the subscription ends.
pub type Inbox = mpsc::Receiver<BusMessage>;

/// Capacity of the channel behind an [`Inbox`].
pub const INBOX_CAPACITY: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` on `subject` and wait up to `timeout` for one reply.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes>;

    /// Fire-and-forget. Succeeds once the message has left the console.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Receive every message on `subject`, which may contain `*` / `>` wildcards.
    async fn subscribe(&self, subject: &str) -> Result<Inbox>;
}
