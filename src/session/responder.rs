//! The external step that turns a transcript into a spoken reply

use async_trait::async_trait;

/// Produces the reply for a recognized utterance
///
/// Returning `Ok(None)` ends the turn without speaking. Errors fail the
/// session into ERROR.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, transcript: &str) -> anyhow::Result<Option<String>>;
}
