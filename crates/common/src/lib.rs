// mocksmith-common: shared types and utilities for the Mocksmith workspace

pub mod digest;
pub mod protocol;
pub mod runtime;
pub mod storage_key;
pub mod types;
