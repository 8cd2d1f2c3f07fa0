//! Request/response seam to the conversational backend.

use async_trait::async_trait;

/// Turns an accepted transcript into the assistant's reply text.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn reply(&self, text: &str) -> Result<String, String>;
}

/// Backend that repeats the request; stands in when no assistant is wired up.
#[derive(Debug, Default, Clone)]
pub struct EchoBackend;

#[async_trait]
impl ConversationBackend for EchoBackend {
    async fn reply(&self, text: &str) -> Result<String, String> {
        Ok(format!("You said: {}", text.trim()))
    }
}
