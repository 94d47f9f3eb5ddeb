//! Extracting plain-text answers from provider responses

use std::borrow::Cow;

const QUOTES: [char; 2] = ['"', '\''];

/// Anything that carries one generated text per choice
pub trait Choices
{   fn choice_texts(&self) -> Vec<Cow<'_, str>>;
}

/// Trim whitespace and strip quote characters from both ends until
/// neither end is a quote. Interior quotes are kept.
pub fn strip_quotes(raw: &str) -> &str
{   let mut current = raw.trim();
    loop
    {   let next = current.trim_matches(&QUOTES[..]).trim();
        if next.len() == current.len()
        {   return next;
        }
        current = next;
    }
}

/// One cleaned string per choice; empty when there are no choices
pub fn normalize<R: Choices + ?Sized>(response: &R) -> Vec<String>
{   response.choice_texts()
      .into_iter()
      .map(|text| strip_quotes(&text).to_string())
      .collect()
}

impl Choices for [String]
{   fn choice_texts(&self) -> Vec<Cow<'_, str>>
    {   self.iter().map(|s| Cow::Borrowed(s.as_str())).collect()
    }
}

impl Choices for Vec<String>
{   fn choice_texts(&self) -> Vec<Cow<'_, str>>
    {   self.as_slice().choice_texts()
    }
}
