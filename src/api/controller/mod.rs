pub mod deployment;
pub mod namespace;
