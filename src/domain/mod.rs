//! Domain layer - node identities, the graph data model and the port to the store

pub mod graph;
pub mod node;
pub mod ports;

pub use graph::*;
pub use node::*;
pub use ports::{ops, RemoteCall, RemoteCallRef};
