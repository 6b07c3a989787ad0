//! State management with actor pattern
//!
//! StateManager owns the JobStore and processes messages via channels,
//! providing serialized access to the persisted registry.

mod manager;
mod messages;
mod store;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
pub use store::JobStore;
