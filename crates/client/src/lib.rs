// mocksmith-client: backend-agnostic persistence for the authoring client.

pub mod backend;
pub mod commands;
pub mod error;
pub mod persistence;
pub mod runtime;

pub use error::PersistenceError;
pub use persistence::{BackendKind, Persistence};
