//! Session Store: authenticated-session state and its persistence

pub mod persist;
pub mod store;

pub use persist::{JsonFileStore, KeyValueStore, MemoryStore};
pub use store::{Session, SessionStore};
