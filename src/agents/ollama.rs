use crate::agents::ChatMessage;
use crate::config::ChatConfig;
use color_eyre::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OllamaClient {
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

impl OllamaClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    /// Sends the prompt to Ollama; `system_prompt` is prepended as the first message
    pub async fn chat(&self, system_prompt: Option<&str>, messages: &[ChatMessage]) -> Result<String> {
        let ollama_messages: Vec<OllamaMessage> = system_prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .map(|prompt| OllamaMessage {
                role: "system".to_string(),
                content: prompt.to_string(),
            })
            .into_iter()
            .chain(messages.iter().map(|msg| OllamaMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            }))
            .collect();

        let request = OllamaChatRequest {
            model: &self.model,
            messages: ollama_messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(color_eyre::eyre::eyre!(
                "Ollama chat failed ({}): {}",
                status,
                body
            ));
        }

        let chat_response: OllamaChatResponse = serde_json::from_str(&body)?;
        Ok(chat_response.message.content)
    }

    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }
}
