use crate::config::{ConversationMode, InjectionMode, Settings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("no active conversation to override")]
    NoActiveConversation,
}

/// Tracks the effective injection mode for the active conversation
#[derive(Debug, Clone)]
pub struct InjectionModeController {
    active: Option<ConversationId>,
    effective: InjectionMode,
}

impl InjectionModeController {
    pub fn new(settings: &Settings, active: Option<ConversationId>) -> Self {
        let effective = Self::resolve(settings, active.as_ref());
        Self { active, effective }
    }

    /// Override for the conversation if one is set, otherwise the global mode.
    /// A disabled extension resolves to `Disabled` everywhere.
    #[must_use]
    pub fn resolve(settings: &Settings, conversation: Option<&ConversationId>) -> InjectionMode {
        if !settings.enabled {
            return InjectionMode::Disabled;
        }
        conversation
            .and_then(|id| settings.per_conversation_mode.get(id.as_str()))
            .and_then(|mode| mode.fixed())
            .unwrap_or(settings.mode)
    }

    #[must_use]
    pub fn effective(&self) -> InjectionMode {
        self.effective
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// The override stored for the active conversation (`Inherit` when none)
    #[must_use]
    pub fn current_override(&self, settings: &Settings) -> ConversationMode {
        self.active
            .as_ref()
            .and_then(|id| settings.per_conversation_mode.get(id.as_str()))
            .copied()
            .unwrap_or_default()
    }

    pub fn on_settings_changed(&mut self, settings: &Settings) -> InjectionMode {
        self.reresolve(settings)
    }

    /// Re-resolves from scratch; nothing carries over from the previous conversation
    pub fn switch_conversation(
        &mut self,
        settings: &Settings,
        conversation: Option<ConversationId>,
    ) -> InjectionMode {
        self.active = conversation;
        self.reresolve(settings)
    }

    /// Writes (or clears, for `Inherit`) the active conversation's override
    pub fn set_override(
        &mut self,
        settings: &mut Settings,
        mode: ConversationMode,
    ) -> Result<InjectionMode, ModeError> {
        let id = self.active.as_ref().ok_or(ModeError::NoActiveConversation)?;
        match mode {
            ConversationMode::Inherit => {
                settings.per_conversation_mode.remove(id.as_str());
            }
            fixed => {
                settings
                    .per_conversation_mode
                    .insert(id.as_str().to_string(), fixed);
            }
        }
        Ok(self.reresolve(settings))
    }

    fn reresolve(&mut self, settings: &Settings) -> InjectionMode {
        let resolved = Self::resolve(settings, self.active.as_ref());
        if resolved != self.effective {
            tracing::debug!(
                conversation = ?self.active.as_ref().map(ConversationId::as_str),
                from = ?self.effective,
                to = ?resolved,
                "injection mode changed"
            );
        }
        self.effective = resolved;
        resolved
    }
}
