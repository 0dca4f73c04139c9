use crate::app::App;
use crate::config::{ConversationMode, InjectionMode};
use crate::injection::ConversationId;
use color_eyre::Result;

pub const HELP_TEXT: &str = "\
Commands:
  /mode <auto|manual|disabled|inherit>  Lore mode for this conversation
  /global <auto|manual|disabled>        Default lore mode
  /fetch <query>                        Retrieve lore now (used by the next message)
  /keep <on|off>                        Keep injected lore in the history
  /new                                  Start a new conversation
  /switch <id>                          Switch to another conversation
  /status                               Show lore status
  /help                                 Show this help
  /quit                                 Exit";

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Quit,
    Status,
    New,
    Switch(String),
    Mode(ConversationMode),
    Global(InjectionMode),
    Fetch(String),
    Keep(bool),
}

impl SlashCommand {
    /// `None` for ordinary chat text, `Some(Err(usage))` for a malformed command
    #[must_use]
    pub fn parse(line: &str) -> Option<std::result::Result<Self, String>> {
        let body = line.trim().strip_prefix('/')?;
        let (name, argument) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };

        let command = match name.to_lowercase().as_str() {
            "help" | "h" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            "status" => Ok(Self::Status),
            "new" => Ok(Self::New),
            "switch" if !argument.is_empty() => Ok(Self::Switch(argument.to_string())),
            "switch" => Err("Usage: /switch <id>".to_string()),
            "mode" => argument
                .parse::<ConversationMode>()
                .map(Self::Mode)
                .map_err(|_| "Usage: /mode <auto|manual|disabled|inherit>".to_string()),
            "global" => match argument.parse::<ConversationMode>().map(ConversationMode::fixed) {
                Ok(Some(mode)) => Ok(Self::Global(mode)),
                Ok(None) | Err(_) => Err("Usage: /global <auto|manual|disabled>".to_string()),
            },
            "fetch" if !argument.is_empty() => Ok(Self::Fetch(argument.to_string())),
            "fetch" => Err("Usage: /fetch <query>".to_string()),
            "keep" => match argument.to_lowercase().as_str() {
                "on" | "true" | "yes" => Ok(Self::Keep(true)),
                "off" | "false" | "no" => Ok(Self::Keep(false)),
                _ => Err("Usage: /keep <on|off>".to_string()),
            },
            other => Err(format!("Unknown command: /{} (try /help)", other)),
        };
        Some(command)
    }
}

impl App {
    pub async fn execute(&mut self, command: SlashCommand) -> Result<()> {
        match command {
            SlashCommand::Help => self.add_system_message(HELP_TEXT),
            SlashCommand::Quit => {
                self.should_quit = true;
                self.add_system_message("Goodbye!");
            }
            SlashCommand::Status => {
                let status = self.injector.status();
                let line = format!(
                    "Conversation {} • mode {:?} (override: {:?}) • {}",
                    self.current_conversation,
                    self.injector.effective_mode(),
                    self.injector.conversation_mode(),
                    status
                );
                self.add_system_message(line);
            }
            SlashCommand::New => self.new_conversation(),
            SlashCommand::Switch(id) => self.switch_conversation(ConversationId::new(id)),
            SlashCommand::Mode(mode) => match self.injector.set_conversation_mode(mode) {
                Ok(effective) => {
                    self.persist_settings();
                    self.add_system_message(format!("Lore mode now {:?}", effective));
                }
                Err(error) => self.add_system_message(format!("Error: {}", error)),
            },
            SlashCommand::Global(mode) => {
                let mut settings = self.injector.settings().clone();
                settings.mode = mode;
                self.replace_settings(settings);
                self.add_system_message(format!(
                    "Default lore mode {:?}; this conversation uses {:?}",
                    mode,
                    self.injector.effective_mode()
                ));
            }
            SlashCommand::Keep(keep) => {
                let mut settings = self.injector.settings().clone();
                settings.keep_in_history = keep;
                self.replace_settings(settings);
                self.add_system_message(if keep {
                    "Injected lore will stay in the history"
                } else {
                    "Injected lore will be removed after each reply"
                });
            }
            SlashCommand::Fetch(query) => match self.injector.manual_fetch(&query).await {
                Ok(result) => {
                    let held = self.injector.effective_mode() != InjectionMode::Disabled;
                    self.add_system_message(format!(
                        "Retrieved {} chunk(s){}",
                        result.len(),
                        if held { "; they will accompany your next message" } else { "" }
                    ));
                    if !held || self.injector.settings().show_preview {
                        self.add_system_message(result.joined());
                    }
                }
                Err(error) => self.add_system_message(format!("Lore retrieval: {}", error)),
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(SlashCommand::parse("hello there"), None);
    }

    #[test]
    fn test_parses_commands_with_arguments() {
        assert_eq!(
            SlashCommand::parse("/mode manual"),
            Some(Ok(SlashCommand::Mode(ConversationMode::Manual)))
        );
        assert_eq!(
            SlashCommand::parse("/global disabled"),
            Some(Ok(SlashCommand::Global(InjectionMode::Disabled)))
        );
        assert_eq!(
            SlashCommand::parse("/fetch the northern keep"),
            Some(Ok(SlashCommand::Fetch("the northern keep".to_string())))
        );
        assert_eq!(SlashCommand::parse("/keep ON"), Some(Ok(SlashCommand::Keep(true))));
        assert_eq!(SlashCommand::parse("/Quit"), Some(Ok(SlashCommand::Quit)));
    }

    #[test]
    fn test_malformed_commands_report_usage() {
        assert!(matches!(SlashCommand::parse("/global inherit"), Some(Err(_))));
        assert!(matches!(SlashCommand::parse("/fetch"), Some(Err(_))));
        assert!(matches!(SlashCommand::parse("/mode maybe"), Some(Err(_))));
        assert!(matches!(SlashCommand::parse("/dance"), Some(Err(text)) if text.contains("/dance")));
    }
}
