pub mod config;
pub mod error;
pub mod logging;
pub mod session_id;
pub mod transcript;

pub use config::{
    Config, EndpointConfig, Framing, ReconnectConfig, StorageConfig, TransportConfig, TransportKind,
};
pub use error::{Error, Result, SendRejection};
pub use session_id::{SessionId, SessionIdError};
pub use transcript::{EntryStatus, Role, Transcript, TranscriptEntry, now_timestamp};
