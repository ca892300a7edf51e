//! Graph Sync - Node Graph Cache & Signal Reconciliation Engine
//!
//! A client-side cache and synchronization layer over a replicated,
//! eventually-consistent graph store. The store holds anchors, versioned
//! content items and identity keys connected by tagged, directed links.
//! The engine keeps one cache entry per observed node, refreshes it in the
//! background, merges push notifications from replicas into it and forwards
//! locally-originated notifications to the other known peers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             SyncEngine                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │  PollScheduler   │  │ SignalDispatcher │  │  Subscriptions   │   │
//! │  │ (batched sweep)  │  │ (merge, forward) │  │   (observers)    │   │
//! │  └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘   │
//! │           └─────────────────────┼─────────────────────┘             │
//! │                     ┌───────────┴───────────┐                       │
//! │                     │     CacheRegistry     │                       │
//! │                     │ anchors│ids│contents  │                       │
//! │                     └───────────┬───────────┘                       │
//! ├─────────────────────────────────┼───────────────────────────────────┤
//! │                     ┌───────────┴───────────┐                       │
//! │                     │      GraphClient      │                       │
//! │                     └───────────┬───────────┘                       │
//! │                          RemoteCall (port)                          │
//! └─────────────────────────────────┼───────────────────────────────────┘
//!                                   │
//!                      replica (remote or in-process)
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Node identities, the graph data model and the store port
//! - [`transport`]: Typed client over the store's named operations
//! - [`cache`]: Cache entries, registry, poll scheduler and metrics
//! - [`signal`]: Signal payloads and the dispatcher
//! - [`engine`]: The engine that owns all of the above
//! - [`replica`]: In-process reference replica and simulated peer network
//! - [`config`]: Engine configuration
//! - [`error`]: Error types and handling

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod replica;
pub mod signal;
pub mod transport;

// Re-export commonly used types
pub use cache::{
    CacheRegistry, EngineStatsSnapshot, NodeCacheEntry, NodeSnapshot, NodeState, Subscription,
};

pub use config::{EngineConfig, DEFAULT_PEER_ANCHOR};

pub use domain::{
    ActionRef, ContentId, DeleteThingInput, LinkDirection, LinkInput, LinkTagContent,
    NodeAndLinkedIds, NodeContent, NodeId, NodeIdAndTag, NodeKind, NodeLink, NodeLookup,
    PublicKey, RemoteCall, RemoteCallRef, Tag, Thing,
};

pub use engine::SyncEngine;

pub use error::{Error, ErrorAction, Result};

pub use replica::{InjectedFailure, MemoryReplica, SimNetwork};

pub use signal::{Signal, SignalKind, SignalOrigin};

pub use transport::GraphClient;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
