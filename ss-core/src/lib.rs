//! SSProto core: update distribution over a single
//! request/response exchange per connection.
//! Transport-agnostic: sessions run over any async byte stream; TLS lives in the hosts.

pub mod identity;
pub mod index;
pub mod integrity;
pub mod packet;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod wire;

pub use identity::{IdentityLog, InstallId};
pub use index::{Candidate, DirectoryScanner, FileIndex, IndexedFile, Scanner, SharedIndex};
pub use integrity::{hash_content, KeyFileError, Signature, SigningKey, VerifyError, VerifyingKey};
pub use packet::Packet;
pub use protocol::{Limits, PROTOCOL_VERSION};
pub use session::{serve, serve_until, Outcome, ServerContext, SessionError};
pub use telemetry::{LogSink, TelemetrySink};
pub use wire::FramingError;
