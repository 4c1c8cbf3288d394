//! `fleet-bus` — the transport between the console and its agents.
//!
//! Agents subscribe to subjects of the form `<domain>.<action>.<agent_id>`.
//! The console either asks and waits for one reply within a deadline, or
//! publishes and forgets; completion of fire-and-forget work comes back on
//! a subject the console subscribes to.
//!
//! # Architecture
//!
//! ```text
//! Transport (trait)
//!     │
//!     ├── NatsTransport   ← async-nats client, per-request timeout
//!     │
//!     └── MemoryBus       ← in-process responders; offline agents and
//!                            silent agents can be simulated
//! ```
//!
//! A request can fail in two ways the caller must tell apart:
//! [`BusError::NoResponders`] means nobody is listening (the agent is
//! offline, nothing was delivered), [`BusError::TimedOut`] means the
//! command may have been received and its outcome is unknown.

pub mod error;
pub mod memory;
pub mod nats;
pub mod subject;
pub mod transport;

pub use error::BusError;
pub use memory::MemoryBus;
pub use nats::NatsTransport;
pub use transport::{BusMessage, Inbox, Transport};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, BusError>;
