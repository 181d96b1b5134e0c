//! Transcript persistence over pluggable key/value stores.
//!
//! Two scopes are kept apart: a durable store (SQLite on disk, or memory when no path is
//! configured) holding per-session transcripts, and a volatile store holding the pending draft.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use murmur_core::SessionId;
//! use murmur_store::{MemoryKv, SqliteKv, TranscriptStore};
//!
//! let durable = SqliteKv::open(std::path::Path::new("/tmp/murmur.db"))?;
//! let store = TranscriptStore::new(Arc::new(durable), Arc::new(MemoryKv::new()));
//!
//! let session = SessionId::generate();
//! let transcript = store.read_durable(&session);
//! store.write_durable(&session, &transcript);
//! # Ok::<(), murmur_store::Error>(())
//! ```

mod error;
mod kv;
mod schema;
mod transcript_store;

pub use error::{Error, Result};
pub use kv::{KeyValueStore, MemoryKv, SqliteKv};
pub use schema::SCHEMA_VERSION;
pub use transcript_store::{DRAFT_KEY, SESSION_ID_KEY, TRANSCRIPT_KEY_PREFIX, TranscriptStore};
