//! Model identifiers for both providers

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// Models served by the chat-style, multi-message endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ModernModel
{   Gpt4
  , Gpt4TurboPreview
  , Gpt35Turbo
}

impl ModernModel
{   pub const ALL: [ModernModel; 3] = [
      ModernModel::Gpt4
    , ModernModel::Gpt4TurboPreview
    , ModernModel::Gpt35Turbo
    ];

    pub fn id(&self) -> &'static str
    {   match self
        {   ModernModel::Gpt4 => "gpt-4"
          , ModernModel::Gpt4TurboPreview => "gpt-4-turbo-preview"
          , ModernModel::Gpt35Turbo => "gpt-3.5-turbo"
        }
    }
}

/// Models served by the single-prompt text-completion endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum LegacyModel
{   Gpt35TurboInstruct
  , Babbage002
  , Davinci002
}

impl LegacyModel
{   pub const ALL: [LegacyModel; 3] = [
      LegacyModel::Gpt35TurboInstruct
    , LegacyModel::Babbage002
    , LegacyModel::Davinci002
    ];

    pub fn id(&self) -> &'static str
    {   match self
        {   LegacyModel::Gpt35TurboInstruct => "gpt-3.5-turbo-instruct"
          , LegacyModel::Babbage002 => "babbage-002"
          , LegacyModel::Davinci002 => "davinci-002"
        }
    }
}

/// A chat-completion provider model; the variant picks the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Model
{   Modern(ModernModel)
  , Legacy(LegacyModel)
}

impl Model
{   pub fn id(&self) -> &'static str
    {   match self
        {   Model::Modern(m) => m.id()
          , Model::Legacy(m) => m.id()
        }
    }

    pub fn is_legacy(&self) -> bool
    {   matches!(self, Model::Legacy(_))
    }

    /// Every accepted identifier, modern first
    pub fn accepted() -> Vec<String>
    {   ModernModel::ALL.iter().map(|m| m.id())
          .chain(LegacyModel::ALL.iter().map(|m| m.id()))
          .map(str::to_string)
          .collect()
    }
}

impl FromStr for Model
{   type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {   let wanted = s.trim();
        if let Some(m) = ModernModel::ALL.iter()
          .find(|m| m.id() == wanted)
        {   return Ok(Model::Modern(*m));
        }
        if let Some(m) = LegacyModel::ALL.iter()
          .find(|m| m.id() == wanted)
        {   return Ok(Model::Legacy(*m));
        }
        Err(crate::error::Error::InvalidModel
        {   given: s.to_string()
          , accepted: Model::accepted()
        })
    }
}

impl fmt::Display for Model
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.id())
    }
}

/// A generative-content model name. The catalogue is not fixed,
/// so only emptiness is checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct GeminiModel(String);

impl GeminiModel
{   pub fn new(name: impl Into<String>) -> crate::error::Result<Self>
    {   let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty()
        {   return Err(crate::error::Error::EmptyInput(
              "model name".to_string()
            ));
        }
        Ok(GeminiModel(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str
    {   &self.0
    }
}

impl FromStr for GeminiModel
{   type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {   GeminiModel::new(s)
    }
}

impl fmt::Display for GeminiModel
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(&self.0)
    }
}
