//! Language model collaborator seam
//!
//! The inference engine lives outside this core. It is reached through a
//! single trait that turns an assembled prompt into an ordered fragment
//! stream; fragment boundaries carry no meaning. Backend failures arrive as
//! items on the channel so the governor has one place to recover them.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ModelError;

/// A streaming language model backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Submit an assembled prompt and receive the live fragment stream.
    ///
    /// The stream ends when the sender side closes; a failed generation
    /// yields an `Err` item rather than tearing down the channel silently.
    async fn submit(&self, prompt: &str) -> mpsc::Receiver<Result<String, ModelError>>;
}
