//! LLM provider implementations

use std::fmt;
use async_trait::async_trait;
use log::{debug, info, warn};

pub mod openai;
pub mod gemini;

// Re-export for convenience
pub use openai::OpenAiClient;
pub use gemini::GeminiClient;

const TEST_PROMPT: &str = "Say this is a test!";
const TEST_EXPECTED: &str = "This is a test!";

/// One request/response round trip against a provider.
///
/// Implementations never retry and never swallow errors; the batch
/// dispatcher decides what a failure means for the rest of a batch.
#[async_trait]
pub trait ModelClient: Send + Sync + 'static
{   /// Model identifier accepted by this provider
    type Model: Clone + fmt::Display + Send + Sync + 'static;

    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Send one message list and return the normalized replies,
    /// one per generated choice
    async fn execute(
      &self
    , model: &Self::Model
    , messages: &[crate::message::ChatMessage]
    , params: &crate::config::ModelParameters
    ) -> crate::error::Result<Vec<String>>;
}

/// Send a fixed probe prompt and report whether the provider echoed
/// the expected sentence. Transport and API errors are returned.
pub async fn test_call<C: ModelClient + ?Sized>(
  client: &C
, model: &C::Model
) -> crate::error::Result<bool>
{   debug!("test_call against {} with {}", client.name(), model);
    let messages = vec![crate::message::ChatMessage::user(TEST_PROMPT)];
    let replies = client
      .execute(
        model,
        &messages,
        &crate::config::ModelParameters::default()
      )
      .await?;

    let reply = replies.first()
      .ok_or(crate::error::Error::NoChoicesInResponse)?;
    let ok = reply.trim() == TEST_EXPECTED;
    if ok
    {   info!("✅ Server response is '{}'", reply);
    } else
    {   warn!("⛔ Server response is '{}'", reply);
    }
    Ok(ok)
}
