mod account;
mod credential;
mod registry;
mod upstream;

pub use account::Account;
pub use credential::{CredentialError, SessionCredential};
pub use registry::{AccountPool, PoolSnapshot, RegisterOptions, register};
pub use upstream::{
    ChunkStream, CredentialStore, OpenedSession, QuotaService, Upstream, UpstreamError,
    UpstreamSession,
};
