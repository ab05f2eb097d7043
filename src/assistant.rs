/// Experimental natural-language command forwarding.
///
/// Sends the user's command to an OpenAI-compatible chat completions endpoint
/// (Groq by default) and returns the model's text unchanged. Nothing here
/// acts on the storage account.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const SYSTEM_PROMPT: &str = "You are an assistant for a Google Drive file manager. \
Interpret the user's request and restate it as one concise action on their Drive \
(list, search, download, or describe files). If the request is unrelated to \
their files, say so.";

pub struct CommandInterpreter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

// Chat completions API types
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl CommandInterpreter {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: GROQ_API_BASE.to_string(),
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Forward one command and return the model's interpretation
    pub async fn interpret(&self, command: &str) -> Result<String> {
        let command = command.trim();
        if command.is_empty() {
            anyhow::bail!("Command is empty");
        }

        let request = CompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: command,
                },
            ],
            temperature: 0.2,
            max_tokens: 256,
        };

        debug!(model = %self.model, "Forwarding command to assistant");

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Assistant request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Assistant returned an error");
            anyhow::bail!("Assistant error ({}): {}", status, error_text);
        }

        let completion: CompletionResponse = res
            .json()
            .await
            .context("Invalid assistant response")?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Assistant returned no content"))
    }
}
