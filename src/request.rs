//! Batch request and result types

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// A prompt paired with the reply (or replies) it produced
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryResult
{   /// Prompt text, or its label when labels were supplied
    pub prompt: String
  , /// One string per generated choice
    pub reply: Vec<String>
}

impl QueryResult
{   pub fn new(prompt: impl Into<String>, reply: Vec<String>) -> Self
    {   QueryResult
        {   prompt: prompt.into()
          , reply
        }
    }

    /// First reply, which is the only one for single-choice requests
    pub fn text(&self) -> &str
    {   self.reply.first().map(String::as_str).unwrap_or("")
    }
}

/// A prompt that produced no result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptFailure
{   /// Position in the submitted prompt list
    pub index: usize
  , pub prompt: String
  , pub error: crate::error::Error
}

/// Where to write the batch CSV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget
{   /// File name; the extension is forced to `.csv`
    pub name: String
  , /// Directory; falls back to the default one when missing
    pub dir: Option<PathBuf>
}

impl OutputTarget
{   pub fn new(name: impl Into<String>) -> Self
    {   OutputTarget
        {   name: name.into()
          , dir: None
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self
    {   self.dir = Some(dir.into());
        self
    }
}

/// A batch of independent prompts for one model
#[derive(Debug, Clone)]
pub struct BatchRequest<M>
{   pub prompts: Vec<String>
  , pub system_prompt: Option<String>
  , pub model: M
  , pub output: Option<OutputTarget>
  , /// Replace prompt text in the results, one label per prompt
    pub labels: Option<Vec<String>>
}

impl<M> BatchRequest<M>
{   pub fn new(model: M, prompts: Vec<String>) -> Self
    {   BatchRequest
        {   prompts
          , system_prompt: None
          , model
          , output: None
          , labels: None
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>)
      -> Self
    {   self.system_prompt = Some(system.into());
        self
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self
    {   self.output = Some(output);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self
    {   self.labels = Some(labels);
        self
    }

    /// Checks that run before any network call
    pub fn validate(&self) -> crate::error::Result<()>
    {   if self.prompts.is_empty()
        {   return Err(crate::error::Error::EmptyInput(
              "prompt list".to_string()
            ));
        }
        if let Some(labels) = &self.labels
        {   if labels.len() != self.prompts.len()
            {   return Err(crate::error::Error::InvalidLabels
              {   labels: labels.len()
                , prompts: self.prompts.len()
              });
            }
        }
        Ok(())
    }

    /// Text recorded for the prompt at `index`
    pub fn label_for(&self, index: usize) -> &str
    {   self.labels.as_ref()
          .and_then(|l| l.get(index))
          .or_else(|| self.prompts.get(index))
          .map(String::as_str)
          .unwrap_or("")
    }
}

/// Everything a batch run produced
#[derive(Debug, Clone)]
pub struct BatchOutcome
{   pub results: Vec<QueryResult>
  , pub failures: Vec<PromptFailure>
  , /// Path written, or why writing failed; `None` without a target
    pub saved_to: Option<crate::error::Result<PathBuf>>
}

impl BatchOutcome
{   pub fn is_complete(&self) -> bool
    {   self.failures.is_empty()
    }
}
