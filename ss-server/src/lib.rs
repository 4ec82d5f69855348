//! SSProto server host: configuration, TLS termination, the update signing
//! key, accept loop and reindex triggers around the `ss-core` session handler.

pub mod config;
pub mod listener;
pub mod reindex;
pub mod signing;
pub mod tls;

pub use config::Config;
pub use listener::{Listener, TransportError};
