// mocksmith-daemon library entry point.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod store;
pub mod supervisor;
