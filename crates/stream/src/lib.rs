pub mod decoder;
pub mod mock;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod types;

pub use decoder::{ChunkDecoder, DATA_PREFIX, DONE_SENTINEL, Frame, FrameMode, decode_stream};
pub use mock::{RecordedRequest, ScriptChunk, ScriptedResponse, ScriptedTransport};
pub use reconnect::{ReconnectPolicy, ReconnectState, ReconnectingStream};
pub use session::{StreamHandle, StreamSession};
pub use transport::{ByteStream, HttpTransport, Transport, TransportResponse};
pub use types::{CancelToken, ChatPrompt, StreamEvent, StreamOutcome, StreamState, TranslationRequest};

pub use murmur_core::{Error, Result};
