//! Interpreting completion output

use serde::Deserialize;

/// What the assistant says, plus an optional navigation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub speech: String,
    pub redirect_url: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    response: String,
    #[serde(default)]
    redirect_url: Option<String>,
}

impl AssistantReply {
    /// Parse completion text
    ///
    /// A JSON object with a `response` field (optionally wrapped in a code
    /// fence) yields its speech and redirect; anything else is spoken as-is.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let candidate = strip_code_fence(trimmed);

        match serde_json::from_str::<Envelope>(candidate) {
            Ok(envelope) => Self {
                speech: envelope.response.trim().to_string(),
                redirect_url: envelope
                    .redirect_url
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty()),
            },
            Err(_) => Self {
                speech: trimmed.to_string(),
                redirect_url: None,
            },
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
