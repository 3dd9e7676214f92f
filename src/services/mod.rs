//! Service layer: session state and the signing orchestrator.

pub mod client;
pub mod store;

pub use client::Client;
pub use store::{MemoryStore, SessionStatus, SessionStore};
