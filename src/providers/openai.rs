use std::borrow::Cow;
use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use async_trait::async_trait;
use log::{debug, trace, error, warn};

use crate::config::{Credentials, ModelParameters, ProviderConfig};
use crate::message::ChatMessage;
use crate::model::Model;
use crate::response::Choices;

const OPENAI_API_BASE: &str
  = "https://api.openai.com/v1";

// ===== Message Types =====

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a>
{   pub model: &'static str
  , pub messages: &'a [ChatMessage]
  , pub max_tokens: usize
  , pub temperature: f32
  , pub top_p: f32
  , pub stream: bool
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest
{   pub model: &'static str
  , pub prompt: String
  , pub max_tokens: usize
  , pub temperature: f32
  , pub top_p: f32
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse
{   #[serde(default)]
    pub choices: Vec<ChatChoice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice
{   pub message: ChoiceMessage
  , pub finish_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage
{   #[serde(default)]
    pub content: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse
{   #[serde(default)]
    pub choices: Vec<CompletionChoice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice
{   #[serde(default)]
    pub text: String
  , pub finish_reason: Option<String>
}

impl Choices for ChatResponse
{   fn choice_texts(&self) -> Vec<Cow<'_, str>>
    {   self.choices.iter()
          .map(|c| Cow::Borrowed(
            c.message.content.as_deref().unwrap_or("")
          ))
          .collect()
    }
}

impl Choices for CompletionResponse
{   fn choice_texts(&self) -> Vec<Cow<'_, str>>
    {   self.choices.iter()
          .map(|c| Cow::Borrowed(c.text.as_str()))
          .collect()
    }
}

/// Choices reassembled from a server-sent event stream
#[derive(Debug, Clone, Default)]
pub struct StreamedChoices
{   by_index: BTreeMap<u64, String>
}

impl StreamedChoices
{   /// Fold every `data:` line of an event-stream body into whole
    /// choices. Chat chunks carry `delta.content`, completion chunks
    /// carry `text`.
    pub fn from_event_stream(body: &str)
      -> crate::error::Result<Self>
    {   let mut streamed = StreamedChoices::default();
        for line in body.lines()
        {   let data = match line.trim().strip_prefix("data:")
            {   Some(data) => data.trim()
              , None => continue
            };
            if data.is_empty() || data == "[DONE]"
            {   continue;
            }
            let chunk: serde_json::Value = serde_json::from_str(data)?;
            let choices = chunk.get("choices")
              .and_then(|c| c.as_array())
              .map(|c| c.as_slice())
              .unwrap_or(&[]);
            for (position, choice) in choices.iter().enumerate()
            {   let index = choice.get("index")
                  .and_then(|i| i.as_u64())
                  .unwrap_or(position as u64);
                let piece = choice.pointer("/delta/content")
                  .or_else(|| choice.get("text"))
                  .and_then(|t| t.as_str())
                  .unwrap_or("");
                streamed.by_index
                  .entry(index)
                  .or_default()
                  .push_str(piece);
            }
        }
        Ok(streamed)
    }
}

impl Choices for StreamedChoices
{   fn choice_texts(&self) -> Vec<Cow<'_, str>>
    {   self.by_index.values()
          .map(|t| Cow::Borrowed(t.as_str()))
          .collect()
    }
}

// ===== Client =====

/// Client for the chat-completion provider. Modern models go to the
/// chat endpoint, legacy models to the text-completion endpoint.
#[derive(Clone)]
pub struct OpenAiClient
{   credentials: Credentials
  , api_base: String
  , http_client: reqwest::Client
}

impl OpenAiClient
{   pub fn new(
      credentials: Credentials
    , config: &ProviderConfig
    ) -> crate::error::Result<Self>
    {   debug!("Creating OpenAiClient");
        Ok(OpenAiClient
        {   credentials
          , api_base: config.base_or(OPENAI_API_BASE)
          , http_client: config.http_client()?
        })
    }

    /// Client configured from `API_KEY` and `ORGANIZATION_ID`
    pub fn from_env(config: &ProviderConfig)
      -> crate::error::Result<Self>
    {   OpenAiClient::new(Credentials::openai_from_env()?, config)
    }

    pub fn api_base(&self) -> &str
    {   &self.api_base
    }

    async fn post<B: Serialize + ?Sized>(
      &self
    , path: &str
    , body: &B
    ) -> crate::error::Result<reqwest::Response>
    {   let mut request = self.http_client
          .post(format!("{}/{}", self.api_base, path))
          .header(
            "Authorization",
            format!("Bearer {}", self.credentials.api_key)
          )
          .header("Content-Type", "application/json");
        if let Some(org) = &self.credentials.organization
        {   request = request.header("OpenAI-Organization", org);
        }

        let response = request
          .json(body)
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            crate::error::Error::from(e)
          })?;

        let status = response.status();
        trace!("OpenAI response status: {}", status);

        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_|
                "Unknown error".to_string()
              );
            error!("OpenAI API error ({}): {}", status, error_text);
            return Err(crate::error::Error::ApiError(
              format!("OpenAI error ({}): {}", status, error_text)
            ));
        }
        Ok(response)
    }

    async fn decode<R>(
      response: reqwest::Response
    , stream: bool
    ) -> crate::error::Result<Vec<String>>
    where
      R: Choices + serde::de::DeserializeOwned,
    {   let replies = if stream
        {   let body = response.text().await?;
            crate::response::normalize(
              &StreamedChoices::from_event_stream(&body)?
            )
        } else
        {   let parsed: R = response.json().await.map_err(|e| {
              error!("Parse error: {}", e);
              crate::error::Error::ParseError(e.to_string())
            })?;
            crate::response::normalize(&parsed)
        };

        if replies.is_empty()
        {   error!("No choices in response");
            return Err(crate::error::Error::NoChoicesInResponse);
        }
        Ok(replies)
    }

    /// Chat-style call with the structured message list
    pub async fn chat(
      &self
    , model: &'static str
    , messages: &[ChatMessage]
    , params: &ModelParameters
    ) -> crate::error::Result<Vec<String>>
    {   debug!("chat call to {} with {} messages", model, messages.len());
        let request = ChatRequest
        {   model
          , messages
          , max_tokens: params.max_tokens
          , temperature: params.temperature
          , top_p: params.top_p
          , stream: params.stream
        };
        trace!("OpenAI chat request: {:?}", request);

        let response = self.post("chat/completions", &request).await?;
        Self::decode::<ChatResponse>(response, params.stream).await
    }

    /// Text-completion call with a flattened prompt
    pub async fn complete(
      &self
    , model: &'static str
    , prompt: String
    , params: &ModelParameters
    ) -> crate::error::Result<Vec<String>>
    {   debug!("completion call to {}", model);
        let request = CompletionRequest
        {   model
          , prompt
          , max_tokens: params.max_tokens
          , temperature: params.temperature
          , top_p: params.top_p
          , stream: params.stream
        };
        trace!("OpenAI completion request: {:?}", request);

        let response = self.post("completions", &request).await?;
        Self::decode::<CompletionResponse>(response, params.stream).await
    }
}

#[async_trait]
impl crate::providers::ModelClient for OpenAiClient
{   type Model = Model;

    fn name(&self) -> &str
    {   "openai"
    }

    async fn execute(
      &self
    , model: &Model
    , messages: &[ChatMessage]
    , params: &ModelParameters
    ) -> crate::error::Result<Vec<String>>
    {   if params.has_sampling_conflict()
        {   warn!(
              "Sending {} with both temperature and top_p tuned",
              model
            );
        }
        match model
        {   Model::Modern(m) => {
              self.chat(m.id(), messages, params).await
            }
          , Model::Legacy(m) => {
              let prompt = crate::message::flatten_messages(messages);
              self.complete(m.id(), prompt, params).await
            }
        }
    }
}
