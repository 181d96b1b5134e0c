pub mod handoff;
pub mod orchestrator;
pub mod reconcile;

pub use handoff::{current_session_id, hand_off};
pub use orchestrator::{ChatEvent, ChatOrchestrator, FAILURE_MESSAGE, Phase, SendOutcome, rejection};
pub use reconcile::{HistoryFetcher, HttpHistoryFetcher, NoRemoteHistory, Reconciler, choose};

pub use murmur_core::{Error, Result};
