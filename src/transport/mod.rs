//! Transport - typed access to the replicated store

pub mod client;

pub use client::GraphClient;
