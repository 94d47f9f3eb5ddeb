use std::borrow::Cow;
use serde::{Deserialize, Serialize};
use async_trait::async_trait;
use log::{debug, trace, error};

use crate::config::{Credentials, ModelParameters, ProviderConfig};
use crate::message::{ChatMessage, Role};
use crate::model::GeminiModel;
use crate::response::Choices;

const GEMINI_API_BASE: &str
  = "https://generativelanguage.googleapis.com/v1beta";

// ===== Message Types =====

#[derive(Debug, Clone, Serialize)]
pub struct GenerateContentRequest
{   #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>
  , pub contents: Vec<Content>
  , #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content
{   #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>
  , #[serde(default)]
    pub parts: Vec<Part>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part
{   #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig
{   pub max_output_tokens: usize
  , pub temperature: f32
  , pub top_p: f32
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse
{   #[serde(default)]
    pub candidates: Vec<Candidate>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate
{   #[serde(default)]
    pub content: Option<Content>
  , #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>
}

impl Choices for GenerateContentResponse
{   fn choice_texts(&self) -> Vec<Cow<'_, str>>
    {   self.candidates.iter()
          .map(|c| {
            let parts: Vec<&str> = c.content.iter()
              .flat_map(|content| content.parts.iter())
              .filter_map(|p| p.text.as_deref())
              .collect();
            match parts.as_slice()
            {   [single] => Cow::Borrowed(*single)
              , many => Cow::Owned(many.concat())
            }
          })
          .collect()
    }
}

fn text_content(role: Option<&str>, text: &str) -> Content
{   Content
    {   role: role.map(str::to_string)
      , parts: vec![Part { text: Some(text.to_string()) }]
    }
}

/// Split a message list into the system instruction and the turns.
/// Assistant turns are sent with the `model` role.
pub fn to_request(
  messages: &[ChatMessage]
, params: &ModelParameters
) -> GenerateContentRequest
{   let system: Vec<&str> = messages.iter()
      .filter(|m| m.role == Role::System)
      .map(|m| m.content.as_str())
      .collect();

    let contents = messages.iter()
      .filter_map(|m| match m.role
      {   Role::System => None
        , Role::User => Some(text_content(Some("user"), &m.content))
        , Role::Assistant => {
            Some(text_content(Some("model"), &m.content))
          }
      })
      .collect();

    GenerateContentRequest
    {   system_instruction: if system.is_empty()
        {   None
        } else
        {   Some(text_content(None, &system.join("\n")))
        }
      , contents
      , generation_config: GenerationConfig
        {   max_output_tokens: params.max_tokens
          , temperature: params.temperature
          , top_p: params.top_p
        }
    }
}

// ===== Client =====

/// Client for the generative-content provider
#[derive(Clone)]
pub struct GeminiClient
{   credentials: Credentials
  , api_base: String
  , http_client: reqwest::Client
}

impl GeminiClient
{   pub fn new(
      credentials: Credentials
    , config: &ProviderConfig
    ) -> crate::error::Result<Self>
    {   debug!("Creating GeminiClient");
        Ok(GeminiClient
        {   credentials
          , api_base: config.base_or(GEMINI_API_BASE)
          , http_client: config.http_client()?
        })
    }

    /// Client configured from `GEMINI_API_KEY`
    pub fn from_env(config: &ProviderConfig)
      -> crate::error::Result<Self>
    {   GeminiClient::new(Credentials::gemini_from_env()?, config)
    }

    pub async fn generate(
      &self
    , model: &GeminiModel
    , messages: &[ChatMessage]
    , params: &ModelParameters
    ) -> crate::error::Result<Vec<String>>
    {   debug!("generateContent call to {}", model);
        if params.stream
        {   debug!("Streaming is not requested from Gemini; \
                    collecting the whole response");
        }

        let request = to_request(messages, params);
        trace!("Gemini request: {:?}", request);

        let response = self.http_client
          .post(format!(
            "{}/models/{}:generateContent",
            self.api_base, model
          ))
          .query(&[("key", self.credentials.api_key.as_str())])
          .json(&request)
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            crate::error::Error::from(e)
          })?;

        let status = response.status();
        trace!("Gemini response status: {}", status);

        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_else(|_|
                "Unknown error".to_string()
              );
            error!("Gemini API error ({}): {}", status, error_text);
            return Err(crate::error::Error::ApiError(
              format!("Gemini error ({}): {}", status, error_text)
            ));
        }

        let parsed: GenerateContentResponse
          = response.json().await.map_err(|e| {
            error!("Parse error: {}", e);
            crate::error::Error::ParseError(e.to_string())
          })?;

        let replies = crate::response::normalize(&parsed);
        if replies.is_empty()
        {   error!("No candidates in response");
            return Err(crate::error::Error::NoChoicesInResponse);
        }
        Ok(replies)
    }
}

#[async_trait]
impl crate::providers::ModelClient for GeminiClient
{   type Model = GeminiModel;

    fn name(&self) -> &str
    {   "gemini"
    }

    async fn execute(
      &self
    , model: &GeminiModel
    , messages: &[ChatMessage]
    , params: &ModelParameters
    ) -> crate::error::Result<Vec<String>>
    {   self.generate(model, messages, params).await
    }
}
