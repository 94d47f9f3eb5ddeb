pub mod error;
pub mod config;
pub mod model;
pub mod message;
pub mod response;
pub mod providers;
pub mod request;
pub mod persist;
pub mod dispatch;

/*

promptbatch: thin helpers over two LLM HTTP APIs (a chat-completion
provider and a generative-content provider).

  prompt ──> message::format_messages ──> providers::ModelClient::execute
         ──> response::normalize ──> dispatch::Dispatcher (batch fan-out /
             fan-in) ──> persist::TabularPersister (CSV)

Every request is a direct pass-through to the provider; the dispatcher
only adds ordering, pairing and failure isolation on top.

*/

pub use error::{Error, Result};
pub use config::{Credentials, ModelParameters, PersistConfig, ProviderConfig};
pub use model::{GeminiModel, LegacyModel, Model, ModernModel};
pub use message::{
  ChatMessage, Conversation, ConversationTurn, PromptInput, Role,
  DEFAULT_SYSTEM_PROMPT,
};
pub use providers::{GeminiClient, ModelClient, OpenAiClient};
pub use request::{
  BatchOutcome, BatchRequest, OutputTarget, PromptFailure, QueryResult,
};
pub use persist::TabularPersister;
pub use dispatch::{CancelToken, Dispatcher};
