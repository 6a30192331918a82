//! Turn-by-turn orchestration core for persona-constrained chat sessions.
//!
//! The pipeline for each user message: budget the context window, retrieve
//! and filter supporting content from a vector store, allocate the remaining
//! tokens across history, examples, and retrieved context, assemble a
//! model-family-specific prompt, govern the streamed reply, and gate the
//! cleaned result into bounded history. Inference and embedding backends are
//! trait seams; this crate never talks to a model directly.

pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod model;
pub mod prompt;
pub mod quality;
pub mod retrieval;
pub mod session;
pub mod stream;

pub use config::{QualityConfig, RetrievalConfig, SessionConfig, StreamConfig};
pub use error::{IndexError, ModelError, Result, SessionError};
pub use history::{ConversationHistory, ConversationTurn};
pub use model::LanguageModel;
pub use prompt::{ModelFamily, PersonaCard};
pub use retrieval::{Embedder, KeyEntry, VectorIndex};
pub use session::{ChatSession, TurnHandles, TurnOutcome};
