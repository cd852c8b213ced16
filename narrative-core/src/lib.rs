//! Narrative synthesis engine.
//!
//! This crate provides:
//! - An append-only narrative log (`EventStore`) of raw entries and analyses
//! - The Mirror: a streamed dialogue whose user turns feed the log
//! - The Theater: structured five-voice deconstruction of one conflict
//! - The Core: whole-history synthesis into weighted signifiers
//! - A backend boundary with a Claude implementation and a scripted fake
//!
//! # Quick Start
//!
//! ```ignore
//! use narrative_core::NarrativeSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = NarrativeSession::from_env()?;
//!
//!     if let Some(mut reply) = session.say("I keep putting off the call").await {
//!         while let Some(partial) = reply.next().await {
//!             println!("{partial}");
//!         }
//!     }
//!
//!     let outcome = session.synthesize().await;
//!     for signifier in outcome.signifiers() {
//!         println!("{} ({})", signifier.text, signifier.weight);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod constellation;
pub mod context;
pub mod event;
pub mod id;
pub mod language;
pub mod mirror;
pub mod prompts;
pub mod session;
pub mod store;
pub mod testing;
pub mod theater;
pub mod ticket;

pub use narrative_macros::Schema;

// Primary public API
pub use backend::{BackendError, ClaudeBackend, NarrativeBackend, PriorTurn, ResponseSchema, TextStream, TurnRole};
pub use config::EngineConfig;
pub use constellation::{ConstellationPipeline, Signifier, SynthesisOutcome};
pub use context::{serialize, CONTEXT_CHAR_BUDGET};
pub use event::{EventContent, EventKind, NarrativeEvent, TheaterAnalysis};
pub use id::{EventId, SignifierId, TurnId};
pub use language::Language;
pub use mirror::{DialogueTurn, MirrorSession, MirrorState, Reply};
pub use session::{NarrativeSession, SessionError};
pub use store::EventStore;
pub use testing::ScriptedBackend;
pub use theater::{TheaterOutcome, TheaterPipeline, TheaterState};
pub use ticket::{LatestSlot, RequestSequencer, Ticket};
