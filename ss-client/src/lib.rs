//! SSProto update client: indexes the local install, runs one session against
//! the update server and writes whatever it sends back.

pub mod apply;
pub mod config;
pub mod indexer;
pub mod install_id;
pub mod sync;
pub mod telemetry;
pub mod tls;

pub use config::Config;
pub use indexer::Indexer;
pub use sync::{sync, Request, SyncError, SyncOutcome, SyncReport};
