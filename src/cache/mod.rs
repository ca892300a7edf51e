//! Node Graph Cache
//!
//! One cache entry per referenced node, kept in a registry with a map per
//! node kind. Entries refresh themselves while observed; the poll scheduler
//! additionally sweeps all observed nodes with a single batched call.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                CacheRegistry                 │
//! │   anchors  │  identities  │  contents        │
//! └─────┬──────────────┬──────────────┬──────────┘
//!       │              │              │
//!  NodeCacheEntry  NodeCacheEntry  NodeCacheEntry
//!   (state, observers, refresh timer)
//!       ▲
//!       │ batched sweep
//! ┌─────┴────────┐
//! │ PollScheduler│
//! └──────────────┘
//! ```

pub mod entry;
pub mod metrics;
pub mod poller;
pub mod registry;

pub use entry::{NodeCacheEntry, NodeSnapshot, NodeState, StateCallback, Subscription};
pub use metrics::{EngineMetrics, EngineStatsSnapshot};
pub use poller::PollScheduler;
pub use registry::CacheRegistry;
