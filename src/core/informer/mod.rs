//! Namespace-scoped Deployment watch/cache subsystem.

pub mod cache;
pub mod manager;
pub mod summary;
