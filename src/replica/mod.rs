//! Reference Replica
//!
//! An in-process implementation of the store call surface, used by the demo
//! binary and by tests. It is not a replication protocol: every peer of a
//! [`SimNetwork`] reads and writes the same store.

mod memory;
mod store;

pub use memory::{InjectedFailure, MemoryReplica, SimNetwork};
pub use store::GraphStore;
