//! Turning prompts into provider message lists

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use log::warn;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role
{   System
  , User
  , Assistant
}

impl Role
{   pub fn as_str(&self) -> &'static str
    {   match self
        {   Role::System => "system"
          , Role::User => "user"
          , Role::Assistant => "assistant"
        }
    }
}

impl FromStr for Role
{   type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {   match s.trim().to_ascii_lowercase().as_str()
        {   "system" => Ok(Role::System)
          , "user" => Ok(Role::User)
          , "assistant" => Ok(Role::Assistant)
          , other => Err(crate::error::Error::InvalidConversation(
              format!(
                "unknown role '{}'; expected one of system, user, \
                 assistant",
                other
              )
            ))
        }
    }
}

impl fmt::Display for Role
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.as_str())
    }
}

/// One entry of a provider message list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: Role
  , pub content: String
}

impl ChatMessage
{   pub fn new(role: Role, content: impl Into<String>) -> Self
    {   ChatMessage
        {   role
          , content: content.into()
        }
    }

    pub fn system(content: impl Into<String>) -> Self
    {   ChatMessage::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self
    {   ChatMessage::new(Role::User, content)
    }
}

/// A single (role, content) turn
pub type ConversationTurn = ChatMessage;

/// A multi-turn conversation that starts and ends with the user
/// and never repeats a turn back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation
{   turns: Vec<ConversationTurn>
}

impl Conversation
{   pub fn new(turns: Vec<ConversationTurn>)
      -> crate::error::Result<Self>
    {   let (first, last) = match (turns.first(), turns.last())
        {   (Some(first), Some(last)) => (first, last)
          , _ => {
              return Err(crate::error::Error::EmptyInput(
                "conversation".to_string()
              ));
            }
        };

        if first.role != Role::User
        {   return Err(crate::error::Error::InvalidConversation(
              format!(
                "turn 0 has role '{}'; a conversation must start \
                 with a 'user' turn",
                first.role
              )
            ));
        }
        if last.role != Role::User
        {   return Err(crate::error::Error::InvalidConversation(
              format!(
                "turn {} has role '{}'; a conversation must end \
                 with a 'user' turn",
                turns.len() - 1,
                last.role
              )
            ));
        }
        if let Some(i) = turns.windows(2).position(|w| w[0] == w[1])
        {   return Err(crate::error::Error::InvalidConversation(
              format!(
                "turns {} and {} are identical ('{}': {:?}); \
                 adjacent turns must differ",
                i, i + 1, turns[i].role, turns[i].content
              )
            ));
        }

        Ok(Conversation { turns })
    }

    /// Build from (role, content) string pairs
    pub fn from_pairs<R, C>(pairs: &[(R, C)])
      -> crate::error::Result<Self>
    where
      R: AsRef<str>,
      C: AsRef<str>,
    {   let turns = pairs.iter()
          .map(|(role, content)| {
            Ok(ChatMessage::new(
              role.as_ref().parse()?,
              content.as_ref()
            ))
          })
          .collect::<crate::error::Result<Vec<_>>>()?;
        Conversation::new(turns)
    }

    pub fn turns(&self) -> &[ConversationTurn]
    {   &self.turns
    }

    pub fn len(&self) -> usize
    {   self.turns.len()
    }

    pub fn has_system_turn(&self) -> bool
    {   self.turns.iter().any(|t| t.role == Role::System)
    }

    pub fn is_empty(&self) -> bool
    {   self.turns.is_empty()
    }
}

/// Raw prompt as supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptInput
{   Single(String)
  , Many(Vec<String>)
  , Conversation(Conversation)
}

/// Turn a prompt into message lists, each led by one system entry.
///
/// `Many` yields one independent list per prompt; a conversation
/// yields a single list in turn order.
pub fn format_messages(
  input: &PromptInput
, system_prompt: Option<&str>
) -> crate::error::Result<Vec<Vec<ChatMessage>>>
{   let system = ChatMessage::system(
      system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT)
    );

    match input
    {   PromptInput::Single(prompt) => {
          Ok(vec![vec![system, ChatMessage::user(prompt.as_str())]])
        }
      , PromptInput::Many(prompts) => {
          if prompts.is_empty()
          {   return Err(crate::error::Error::EmptyInput(
                "prompt list".to_string()
              ));
          }
          Ok(prompts.iter()
            .map(|p| vec![
              system.clone(),
              ChatMessage::user(p.as_str())
            ])
            .collect())
        }
      , PromptInput::Conversation(conversation) => {
          let mut messages
            = Vec::with_capacity(conversation.len() + 1);
          // A conversation carrying its own system turn keeps it as
          // the only one
          if conversation.has_system_turn()
          {   if system_prompt.is_some()
              {   warn!(
                    "Conversation has its own system turn; \
                     ignoring the given system prompt"
                  );
              }
          } else
          {   messages.push(system);
          }
          messages.extend(conversation.turns().iter().cloned());
          Ok(vec![messages])
        }
    }
}

/// Message list for one prompt
pub fn single_prompt(
  prompt: &str
, system_prompt: Option<&str>
) -> Vec<ChatMessage>
{   vec![
      ChatMessage::system(
        system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT)
      ),
      ChatMessage::user(prompt)
    ]
}

/// Single prompt string for the text-completion route
pub fn flatten_messages(messages: &[ChatMessage]) -> String
{   messages.iter()
      .map(|m| m.content.as_str())
      .collect::<Vec<_>>()
      .join("\n\n")
}
