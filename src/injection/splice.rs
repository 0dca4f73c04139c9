use crate::agents::{ArtifactId, ChatMessage, InjectionMarker, MessageRole};
use crate::config::Settings;
use crate::services::retrieval::RetrievalResult;
use chrono::Utc;
use std::collections::BTreeMap;

/// Key under which injected context lands in the host's extension slots
pub const EXTENSION_KEY: &str = "lorekeeper";

/// Text a host placed in a named extension-prompt slot
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionPrompt {
    pub content: String,
    pub marker: Option<InjectionMarker>,
}

/// Mutable prompt-construction input handed over by the host before generation.
///
/// Each surface is `Some` only when the host offers it. Injection prefers
/// extension slots, then the message sequence, then the system prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptBuild {
    pub extension_prompts: Option<BTreeMap<String, ExtensionPrompt>>,
    pub messages: Option<Vec<ChatMessage>>,
    pub system_prompt: Option<String>,
}

impl PromptBuild {
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Some(messages),
            ..Self::default()
        }
    }

    pub fn from_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    #[must_use]
    pub fn with_extension_slots(mut self) -> Self {
        self.extension_prompts.get_or_insert_with(BTreeMap::new);
        self
    }

    /// Messages of the sequence, empty when the host did not offer one
    #[must_use]
    pub fn message_slice(&self) -> &[ChatMessage] {
        self.messages.as_deref().unwrap_or(&[])
    }
}

/// Where an artifact was placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    ExtensionSlot { key: String },
    Message,
    /// Appended to the system prompt at this byte offset
    SystemPrompt { offset: usize },
}

/// Record of one injection, kept until cleanup
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionArtifact {
    pub marker: InjectionMarker,
    pub text: String,
    pub placement: Placement,
}

impl InjectionArtifact {
    #[must_use]
    pub fn id(&self) -> ArtifactId {
        self.marker.id
    }
}

/// Wraps retrieved chunks and places them into the outgoing prompt
#[derive(Debug, Clone)]
pub struct PromptSpliceInjector {
    extension_key: String,
}

impl Default for PromptSpliceInjector {
    fn default() -> Self {
        Self::new(EXTENSION_KEY)
    }
}

impl PromptSpliceInjector {
    pub fn new(extension_key: impl Into<String>) -> Self {
        Self {
            extension_key: extension_key.into(),
        }
    }

    /// Joined chunk text between the configured prefix and suffix
    #[must_use]
    pub fn format_context(result: &RetrievalResult, settings: &Settings) -> Option<String> {
        let joined = result.joined();
        if joined.trim().is_empty() {
            return None;
        }
        Some(format!(
            "{}{}{}",
            settings.inject_prefix, joined, settings.inject_suffix
        ))
    }

    pub fn inject(
        &self,
        prompt: &mut PromptBuild,
        result: &RetrievalResult,
        settings: &Settings,
    ) -> Option<InjectionArtifact> {
        let text = Self::format_context(result, settings)?;
        let marker = InjectionMarker {
            id: ArtifactId::new(),
            created_at: Utc::now(),
        };

        let placement = if let Some(slots) = prompt.extension_prompts.as_mut() {
            slots.insert(
                self.extension_key.clone(),
                ExtensionPrompt {
                    content: text.clone(),
                    marker: Some(marker),
                },
            );
            Placement::ExtensionSlot {
                key: self.extension_key.clone(),
            }
        } else if let Some(messages) = prompt.messages.as_mut() {
            match last_user_turn(messages) {
                Some(index) => {
                    messages.insert(index, ChatMessage::injected(text.clone(), marker));
                    Placement::Message
                }
                None => match prompt.system_prompt.as_mut() {
                    Some(system_prompt) => append_to(system_prompt, &text),
                    None => {
                        let index = leading_system_len(messages);
                        messages.insert(index, ChatMessage::injected(text.clone(), marker));
                        Placement::Message
                    }
                },
            }
        } else if let Some(system_prompt) = prompt.system_prompt.as_mut() {
            append_to(system_prompt, &text)
        } else {
            tracing::warn!("host offered no prompt surface; context not injected");
            return None;
        };

        tracing::debug!(artifact = %marker.id, ?placement, chars = text.len(), "context injected");
        Some(InjectionArtifact {
            marker,
            text,
            placement,
        })
    }
}

fn append_to(system_prompt: &mut String, text: &str) -> Placement {
    let offset = system_prompt.len();
    system_prompt.push_str(text);
    Placement::SystemPrompt { offset }
}

fn last_user_turn(messages: &[ChatMessage]) -> Option<usize> {
    messages
        .iter()
        .rposition(ChatMessage::is_genuine_user_turn)
}

fn leading_system_len(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .take_while(|message| message.role == MessageRole::System)
        .count()
}
