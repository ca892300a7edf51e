//! Signals - push notifications from replicas and their reconciliation

pub mod dispatcher;
pub mod events;

pub use dispatcher::SignalDispatcher;
pub use events::{RemoteSignalInput, Signal, SignalKind, SignalOrigin};
