//! # arbiter-relay
//!
//! Delivery plumbing for the arbiter session layer: a connection registry
//! with ref-counted channel subscriptions and delayed teardown, plus the
//! broadcaster that fans [`arbiter_core::Outbound`] envelopes out to
//! per-connection delivery queues.
//!
//! Transport framing (WebSocket, SSE) is the embedding application's
//! concern; the relay works against abstract `mpsc` queues. Delivery is
//! at-most-once and fire-and-forget: a full queue drops the message and
//! bumps a counter, it never blocks or fails the publisher.

#![deny(unsafe_code)]

pub mod bridge;
pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod registry;

pub use bridge::EventBridge;
pub use broadcaster::EventBroadcaster;
pub use config::RelayConfig;
pub use connection::ClientConnection;
pub use registry::ConnectionRegistry;
