//! Configuration for providers, sampling parameters and CSV output

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use log::{debug, warn};

pub const DEFAULT_MAX_TOKENS: usize = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 1.0;

/// Environment variable holding the chat-completion API key
pub const OPENAI_KEY_VAR: &str = "API_KEY";
/// Environment variable holding the organization identifier
pub const OPENAI_ORG_VAR: &str = "ORGANIZATION_ID";
/// Environment variable holding the generative-content API key
pub const GEMINI_KEY_VAR: &str = "GEMINI_API_KEY";

/// Sampling parameters forwarded with every request.
///
/// Temperature and top_p are alternative knobs; tune one or the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters
{   /// Max tokens to generate
    pub max_tokens: usize
  , /// Sampling temperature, between 0 and 2
    pub temperature: f32
  , /// Nucleus sampling mass, between 0 and 1
    pub top_p: f32
  , /// Ask the provider for a streamed response
    pub stream: bool
}

impl Default for ModelParameters
{   fn default() -> Self
    {   ModelParameters
        {   max_tokens: DEFAULT_MAX_TOKENS
          , temperature: DEFAULT_TEMPERATURE
          , top_p: DEFAULT_TOP_P
          , stream: false
        }
    }
}

impl ModelParameters
{   /// Build parameters, warning when both temperature and top_p
    /// were moved away from their defaults
    pub fn new(
      max_tokens: usize
    , temperature: f32
    , top_p: f32
    , stream: bool
    ) -> Self
    {   let params = ModelParameters
        {   max_tokens
          , temperature
          , top_p
          , stream
        };
        params.warn_on_conflict();
        params
    }

    /// True when temperature and top_p are both non-default
    pub fn has_sampling_conflict(&self) -> bool
    {   self.temperature != DEFAULT_TEMPERATURE
          && self.top_p != DEFAULT_TOP_P
    }

    pub fn warn_on_conflict(&self)
    {   if self.has_sampling_conflict()
        {   warn!(
              "Both temperature ({}) and top_p ({}) changed from \
               their defaults; adjust only one of them",
              self.temperature, self.top_p
            );
        }
    }
}

/// Secrets needed to talk to a provider
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials
{   pub api_key: String
  , pub organization: Option<String>
}

impl std::fmt::Debug for Credentials
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   f.debug_struct("Credentials")
          .field("api_key", &"<redacted>")
          .field("organization", &self.organization)
          .finish()
    }
}

impl Credentials
{   pub fn new(api_key: String, organization: Option<String>) -> Self
    {   Credentials
        {   api_key
          , organization
        }
    }

    /// Read credentials from the environment, loading `.env` first.
    /// With `org_var` set, the organization is required too.
    pub fn from_env(
      key_var: &str
    , org_var: Option<&str>
    ) -> crate::error::Result<Self>
    {   load_dotenv();
        let api_key = require_env(key_var)?;
        let organization = match org_var
        {   Some(var) => Some(require_env(var)?)
          , None => None
        };
        Ok(Credentials
        {   api_key
          , organization
        })
    }

    /// API key and organization for the chat-completion provider
    pub fn openai_from_env() -> crate::error::Result<Self>
    {   Credentials::from_env(OPENAI_KEY_VAR, Some(OPENAI_ORG_VAR))
    }

    /// API key for the generative-content provider
    pub fn gemini_from_env() -> crate::error::Result<Self>
    {   Credentials::from_env(GEMINI_KEY_VAR, None)
    }
}

fn load_dotenv()
{   match dotenvy::dotenv()
    {   Ok(path) => debug!("Loaded environment from {}", path.display())
      , Err(e) => debug!("No .env file loaded: {}", e)
    }
}

fn require_env(var: &str) -> crate::error::Result<String>
{   match std::env::var(var)
    {   Ok(value) if !value.trim().is_empty() => Ok(value)
      , _ => Err(crate::error::Error::MissingEnvVar(var.to_string()))
    }
}

/// Provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig
{   /// API base URL (if custom)
    pub api_base: Option<String>
  , /// Request timeout in seconds
    pub timeout_secs: Option<u64>
}

impl ProviderConfig
{   pub(crate) fn http_client(&self)
      -> crate::error::Result<reqwest::Client>
    {   let mut builder = reqwest::Client::builder();
        if let Some(secs) = self.timeout_secs
        {   builder = builder.timeout(
              std::time::Duration::from_secs(secs)
            );
        }
        builder.build().map_err(|e| {
          crate::error::Error::InvalidConfiguration(e.to_string())
        })
    }

    pub(crate) fn base_or(&self, default: &str) -> String
    {   self.api_base
          .as_deref()
          .unwrap_or(default)
          .trim_end_matches('/')
          .to_string()
    }
}

/// Where and how batch results are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistConfig
{   /// Directory used when none (or a missing one) is given
    pub default_dir: PathBuf
  , /// Write one row of prompts and one row of replies
    pub transpose: bool
}

impl Default for PersistConfig
{   fn default() -> Self
    {   PersistConfig
        {   default_dir: default_download_dir()
          , transpose: false
        }
    }
}

/// `$HOME/Downloads`, or `./Downloads` without a home directory
pub fn default_download_dir() -> PathBuf
{   std::env::var_os("HOME")
      .or_else(|| std::env::var_os("USERPROFILE"))
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from("."))
      .join("Downloads")
}
