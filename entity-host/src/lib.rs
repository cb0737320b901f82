//! Brigade Entity Host
//!
//! Virtual-actor runtime shared by every addressable business object
//! (ledgers, kitchen tickets, tables, schedules, ...).
//!
//! # Architecture
//!
//! - **Addressing**: `(organization, entity type, id parts)` resolves to exactly one [`EntityKey`]
//! - **Single Writer**: One mailbox task per activated key serializes every operation
//! - **Write-Through**: A mutation is committed to the [`StateStore`] before its caller sees it
//! - **Lazy Activation**: State is hydrated on first use and dropped again when idle
//!
//! # Invariants
//!
//! - At most one operation executes against a key's state at any instant
//! - Operations on one key run in arrival (FIFO) order
//! - A failed or cancelled operation leaves no trace in memory or storage
//! - Passivation never loses a committed mutation

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod host;
pub mod key;
pub mod metrics;
pub mod store;

// Re-exports
pub use config::{Config, HostConfig, StoreBackend};
pub use error::{Error, Result};
pub use host::{ActorHost, EntityState, Step};
pub use key::EntityKey;
pub use metrics::HostMetrics;
pub use store::{open_store, MemoryStateStore, RocksDbStateStore, StateStore};
