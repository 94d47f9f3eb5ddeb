use std::fmt;

/// Custom error type for promptbatch operations
/// Implements Clone for sending through channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Required environment variable is not set
    MissingEnvVar(String)
  , /// Model identifier outside every accepted set
    InvalidModel
    {   given: String
      , accepted: Vec<String>
    }
  , /// Conversation turns break the user-first/user-last rules
    InvalidConversation(String)
  , /// A required input was empty
    EmptyInput(String)
  , /// Result labels do not line up with the prompts
    InvalidLabels
    {   labels: usize
      , prompts: usize
    }
  , /// HTTP request error
    HttpError(String)
  , /// API returned an error response
    ApiError(String)
  , /// Failed to parse API response
    ParseError(String)
  , /// No choices in API response
    NoChoicesInResponse
  , /// Filesystem or CSV writer failure
    Io(String)
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Work was never submitted because the batch was cancelled
    Cancelled
  , /// Generic error
    Other(String)
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::MissingEnvVar(var) => {
              write!(f,
                "Missing environment variable: {} (set it in the \
                 environment or a .env file)",
                var
              )
            }
          , Error::InvalidModel { given, accepted } => {
              write!(f,
                "Unexpected model name: {}. Available models: [{}]",
                given,
                accepted.join(", ")
              )
            }
          , Error::InvalidConversation(msg) => {
              write!(f, "Invalid conversation: {}", msg)
            }
          , Error::EmptyInput(what) => {
              write!(f, "Empty input: {} must not be empty", what)
            }
          , Error::InvalidLabels { labels, prompts } => {
              write!(f,
                "Got {} labels for {} prompts; expected one label \
                 per prompt",
                labels, prompts
              )
            }
          , Error::HttpError(msg) => {
              write!(f, "HTTP error: {}", msg)
            }
          , Error::ApiError(msg) => {
              write!(f, "API error: {}", msg)
            }
          , Error::ParseError(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::NoChoicesInResponse => {
              write!(f, "API response contained no choices")
            }
          , Error::Io(msg) => {
              write!(f, "I/O error: {}", msg)
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Cancelled => {
              write!(f, "Batch cancelled before the prompt was sent")
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error
{   fn from(s: String) -> Self
    {   Error::Other(s)
    }
}

impl From<&str> for Error
{   fn from(s: &str) -> Self
    {   Error::Other(s.to_string())
    }
}

impl From<std::io::Error> for Error
{   fn from(e: std::io::Error) -> Self
    {   Error::Io(e.to_string())
    }
}

impl From<csv::Error> for Error
{   fn from(e: csv::Error) -> Self
    {   Error::Io(e.to_string())
    }
}

impl From<reqwest::Error> for Error
{   fn from(e: reqwest::Error) -> Self
    {   if e.is_timeout()
        {   Error::HttpError(format!("request timed out: {}", e))
        } else if e.is_decode()
        {   Error::ParseError(e.to_string())
        } else
        {   Error::HttpError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error
{   fn from(e: serde_json::Error) -> Self
    {   Error::ParseError(e.to_string())
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
