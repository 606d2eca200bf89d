/// DID Registrar - ledger-anchored DID registrar and resolver
///
/// Builds and signs `did:prism` operations, publishes them to a ledger with
/// per-identifier ordering and retries, and resolves identifiers by folding
/// their confirmed operation logs into W3C DID documents.

pub mod api;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod document;
pub mod error;
pub mod identifier;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod operation;
pub mod registrar;
pub mod resolver;
pub mod scheduler;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use context::AppContext;
pub use error::{RegistrarError, RegistrarResult};
