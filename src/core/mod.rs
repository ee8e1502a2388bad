pub mod client;
pub mod informer;
