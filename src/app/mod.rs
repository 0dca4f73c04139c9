mod command;

pub use command::{HELP_TEXT, SlashCommand};

use crate::agents::{ChatMessage, MessageRole, OllamaClient};
use crate::config::Settings;
use crate::error::RetrievalNotice;
use crate::injection::{ContextInjector, ConversationId, PromptBuild};
use color_eyre::Result;
use std::collections::HashMap;
use std::path::PathBuf;

/// Interactive chat session driving the injection hooks
pub struct App {
    pub injector: ContextInjector,
    pub agent: OllamaClient,
    pub should_quit: bool,
    /// Lines for the host to print, drained by [`App::take_messages`]
    pub messages: Vec<String>,
    pub chat_history: Vec<ChatMessage>,
    pub chat_history_by_conversation: HashMap<ConversationId, Vec<ChatMessage>>,
    pub current_conversation: ConversationId,
    pub last_response: Option<String>,
    next_conversation: usize,
    settings_path: Option<PathBuf>,
}

impl App {
    /// Creates a session and opens its first conversation
    pub fn new(injector: ContextInjector, agent: OllamaClient) -> Self {
        let mut app = Self {
            injector,
            agent,
            should_quit: false,
            messages: Vec::new(),
            chat_history: Vec::new(),
            chat_history_by_conversation: HashMap::new(),
            current_conversation: ConversationId::new("chat-1"),
            last_response: None,
            next_conversation: 2,
            settings_path: None,
        };
        app.injector
            .on_conversation_changed(Some(app.current_conversation.clone()));
        app
    }

    /// Persist settings changes made through commands to this file
    #[must_use]
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    pub fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.messages.push(content.into());
    }

    /// Handles one line typed by the user: a slash command or a chat turn
    pub async fn handle_input(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match SlashCommand::parse(line) {
            Some(Ok(command)) => self.execute(command).await,
            Some(Err(usage)) => {
                self.add_system_message(usage);
                Ok(())
            }
            None => self.send_chat_message(line).await,
        }
    }

    /// Runs one full generation cycle for a user message
    pub async fn send_chat_message(&mut self, content: &str) -> Result<()> {
        self.chat_history.push(ChatMessage::user(content));
        self.injector.on_user_input(content);

        let system_prompt = self.injector.settings().chat.system_prompt.clone();
        let mut prompt = PromptBuild::from_messages(std::mem::take(&mut self.chat_history))
            .with_system_prompt(system_prompt);

        let outcome = self.injector.on_prompt_ready(&mut prompt).await;
        if let Some(notice) = &outcome.notice {
            self.add_system_message(format_notice(notice));
        }
        if let Some(preview) = &outcome.preview {
            self.add_system_message(format!("[lore] {}", preview.trim()));
        }

        let reply = self
            .agent
            .chat(prompt.system_prompt.as_deref(), prompt.message_slice())
            .await;

        // Cleanup runs whether generation succeeded or not.
        self.injector.on_generation_end(&mut prompt);
        self.chat_history = prompt.messages.take().unwrap_or_default();

        match reply {
            Ok(response) => {
                self.chat_history.push(ChatMessage::assistant(&response));
                self.messages.push(response.clone());
                self.last_response = Some(response);
            }
            Err(error) => {
                tracing::warn!(%error, "chat request failed");
                self.add_system_message(format!("Error: {}", error));
            }
        }
        Ok(())
    }

    /// Stashes the current history and opens (or resumes) another conversation
    pub fn switch_conversation(&mut self, id: ConversationId) {
        if id == self.current_conversation {
            return;
        }
        let previous = std::mem::replace(&mut self.current_conversation, id.clone());
        let history = std::mem::take(&mut self.chat_history);
        self.chat_history_by_conversation.insert(previous, history);
        self.chat_history = self
            .chat_history_by_conversation
            .remove(&id)
            .unwrap_or_default();
        let mode = self.injector.on_conversation_changed(Some(id.clone()));
        self.add_system_message(format!("Switched to {} (lore mode: {:?})", id, mode));
    }

    pub fn new_conversation(&mut self) {
        let id = ConversationId::new(format!("chat-{}", self.next_conversation));
        self.next_conversation += 1;
        self.switch_conversation(id);
    }

    /// Number of genuine turns in the active conversation
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.chat_history
            .iter()
            .filter(|message| !message.is_injected() && message.role != MessageRole::System)
            .count()
    }

    fn persist_settings(&mut self) {
        let Some(path) = &self.settings_path else {
            return;
        };
        if let Err(error) = self.injector.settings().save_to(path) {
            tracing::warn!(%error, "could not save settings");
            self.messages.push(format!("Could not save settings: {}", error));
        }
    }

    fn replace_settings(&mut self, settings: Settings) {
        self.injector.update_settings(settings);
        self.persist_settings();
    }
}

fn format_notice(notice: &RetrievalNotice) -> String {
    format!("⚠️  {}", notice)
}
