//! MAJAKKA - Buffered Telemetry Event Delivery
//!
//! A client-side delivery pipeline that buffers application events in a
//! durable queue and drains them to an HTTP collector in size-bounded
//! batches.
//!
//! # Architecture
//!
//! ```text
//! Producers ──► EventStore (queue) ──► Emitter (drain loop) ──► Collector
//!                                          │
//!                                          └── batch, send, classify,
//!                                              remove resolved ids
//! ```
//!
//! The event store and the network connection are pluggable via traits.
//! The crate ships an in-memory store and a `reqwest`-backed connection;
//! embedders supply their own (e.g. a SQLite store) against the same
//! contracts.
//!
//! # Example
//!
//! ```ignore
//! use majakka::{Emitter, EmitterConfig, InMemoryEventStore, Payload};
//! use std::sync::Arc;
//!
//! let config = EmitterConfig::new("https://collector.example.com");
//! let store = Arc::new(InMemoryEventStore::new());
//! let emitter = Emitter::new(config, store)?;
//!
//! let mut payload = Payload::new();
//! payload.add("e", "pv");
//! emitter.add(payload).await;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod batcher;
pub mod config;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod executor;
pub mod payload;
pub mod request;
pub mod retry;
pub mod store;

pub use config::{BufferOption, EmitterConfig, HttpMethod};
pub use connection::{HttpConnection, NetworkConnection};
pub use emitter::{AttemptCallback, Emitter};
pub use error::{MajakkaError, Result};
pub use payload::Payload;
pub use request::{EmitterRequest, RequestResult};
pub use store::{EmittableEvent, EventStore, InMemoryEventStore};
