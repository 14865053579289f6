/// Agent Directory - domain-backed name verification
///
/// Stores content-addressed agent records and proves that a record's name
/// (`dns://cisco.com/marketing-agent`) belongs to a domain that publishes the
/// record's signing key, re-checking verifications in the background.

pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod naming;
pub mod server;
pub mod store;
pub mod verification;

pub use context::AppContext;
pub use error::{DirError, DirResult};
