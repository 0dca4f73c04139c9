//! Context-injection pipeline driven by the host's chat events.
//!
//! The host calls, in order for each turn: [`ContextInjector::on_user_input`]
//! with the user's text, [`ContextInjector::on_prompt_ready`] with the prompt
//! about to be sent, and [`ContextInjector::on_generation_end`] once the
//! model has answered (or the turn was aborted). Retrieval is best-effort:
//! every failure path ends with the prompt going out without context.

pub mod cache;
pub mod cleanup;
pub mod coordinator;
pub mod mode;
pub mod splice;

use crate::config::{ConversationMode, InjectionMode, Settings};
use crate::error::{RetrievalError, RetrievalNotice};
use crate::query::Query;
use crate::services::ragflow::RagflowClient;
use crate::services::retrieval::{RetrievalBackend, RetrievalResult};
use std::sync::Arc;
use std::time::Duration;

pub use cache::{CachedOutcome, ResultCache};
pub use cleanup::{remove_artifacts, remove_from_prompt};
pub use coordinator::{CycleOutcome, FetchCoordinator, FetchHandle, FetchId, FetchOrigin, FetchState};
pub use mode::{ConversationId, InjectionModeController, ModeError};
pub use splice::{EXTENSION_KEY, ExtensionPrompt, InjectionArtifact, Placement, PromptBuild, PromptSpliceInjector};

/// Slack on top of the retrieval timeout when waiting at the prompt boundary
const PROMPT_WAIT_GRACE: Duration = Duration::from_millis(50);

/// What happened to a user input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDecision {
    Started(FetchId),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooShort,
    Disabled,
    ManualMode,
}

/// Where injected context came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Automatic,
    Manual,
}

/// Result of the pre-generation hook
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptOutcome {
    pub artifact: Option<InjectionArtifact>,
    pub source: Option<ContextSource>,
    pub notice: Option<RetrievalNotice>,
    /// Injected text, only when `show_preview` is on
    pub preview: Option<String>,
}

impl PromptOutcome {
    #[must_use]
    pub fn injected(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Coarse status for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectorStatus {
    Idle,
    Fetching { query: String },
    ContextReady { query: String },
    ManualPending { query: String },
}

impl std::fmt::Display for InjectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Fetching { query } => write!(f, "Fetching lore for \"{}\"", query),
            Self::ContextReady { query } => write!(f, "Lore loaded for \"{}\"", query),
            Self::ManualPending { query } => {
                write!(f, "Lore loaded for \"{}\" (next message)", query)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PendingManual {
    query: Query,
    result: RetrievalResult,
}

/// Owns the pipeline state between the host's chat events
pub struct ContextInjector {
    settings: Settings,
    modes: InjectionModeController,
    coordinator: FetchCoordinator,
    splicer: PromptSpliceInjector,
    pending_manual: Option<PendingManual>,
    live: Vec<InjectionArtifact>,
}

impl ContextInjector {
    pub fn new(settings: Settings, backend: Arc<dyn RetrievalBackend>) -> Self {
        let settings = settings.sanitized();
        Self {
            modes: InjectionModeController::new(&settings, None),
            coordinator: FetchCoordinator::new(backend),
            splicer: PromptSpliceInjector::default(),
            pending_manual: None,
            live: Vec::new(),
            settings,
        }
    }

    /// Injector backed by the RAGFlow HTTP client
    pub fn with_ragflow(settings: Settings) -> Result<Self, RetrievalError> {
        Ok(Self::new(settings, Arc::new(RagflowClient::new()?)))
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn effective_mode(&self) -> InjectionMode {
        self.modes.effective()
    }

    #[must_use]
    pub fn conversation_mode(&self) -> ConversationMode {
        self.modes.current_override(&self.settings)
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.modes.active_conversation()
    }

    /// Artifacts injected this cycle and not yet cleaned up
    #[must_use]
    pub fn live_artifacts(&self) -> &[InjectionArtifact] {
        &self.live
    }

    #[must_use]
    pub fn status(&self) -> InjectorStatus {
        if let Some(pending) = &self.pending_manual {
            return InjectorStatus::ManualPending {
                query: pending.query.to_string(),
            };
        }
        match self.coordinator.state() {
            FetchState::Fetching(handle) => InjectorStatus::Fetching {
                query: handle.query().to_string(),
            },
            FetchState::Resolved { query, .. } => InjectorStatus::ContextReady {
                query: query.to_string(),
            },
            FetchState::Idle | FetchState::Failed { .. } | FetchState::Cancelled { .. } => {
                InjectorStatus::Idle
            }
        }
    }

    /// Input event: starts a fetch for the new query when the mode allows it
    pub fn on_user_input(&mut self, text: &str) -> InputDecision {
        match self.modes.effective() {
            InjectionMode::Disabled => return InputDecision::Skipped(SkipReason::Disabled),
            InjectionMode::Manual => return InputDecision::Skipped(SkipReason::ManualMode),
            InjectionMode::Auto => {}
        }

        let Some(query) = Query::parse(text, self.settings.min_query_chars) else {
            // A new turn without a usable query still ends the old fetch's authority.
            self.coordinator.reset();
            tracing::debug!("input too short for retrieval");
            return InputDecision::Skipped(SkipReason::TooShort);
        };

        InputDecision::Started(
            self.coordinator
                .start_fetch(query, &self.settings, FetchOrigin::Auto),
        )
    }

    /// Pre-generation event: waits briefly for context and splices it into `prompt`
    pub async fn on_prompt_ready(&mut self, prompt: &mut PromptBuild) -> PromptOutcome {
        if !self.live.is_empty() {
            tracing::debug!(stale = self.live.len(), "removing artifacts from an unfinished cycle");
            remove_from_prompt(prompt, &self.live);
            self.live.clear();
        }

        let mode = self.modes.effective();
        let mut outcome = PromptOutcome::default();

        if let Some(pending) = self.pending_manual.take() {
            self.coordinator.finish_cycle();
            if mode == InjectionMode::Disabled {
                tracing::debug!(query = %pending.query, "manual context discarded: injection disabled");
                return outcome;
            }
            self.splice_into(prompt, &pending.result, ContextSource::Manual, &mut outcome);
            return outcome;
        }

        if mode != InjectionMode::Auto {
            self.coordinator.finish_cycle();
            return outcome;
        }

        let deadline = self.settings.timeout() + PROMPT_WAIT_GRACE;
        self.coordinator.await_result(deadline).await;
        match self.coordinator.finish_cycle() {
            CycleOutcome::Idle => {}
            CycleOutcome::Context { result, .. } => {
                self.splice_into(prompt, &result, ContextSource::Automatic, &mut outcome);
            }
            CycleOutcome::Failed { query, error } => {
                error.log(query.as_str());
                outcome.notice = error.notice();
            }
            CycleOutcome::Pending { query } => {
                tracing::warn!(query = %query, "prompt built before retrieval finished; proceeding without context");
                outcome.notice = Some(RetrievalNotice::TimedOut {
                    timeout_ms: self.settings.timeout_ms,
                });
            }
        }
        outcome
    }

    /// Post-generation event: strips this cycle's artifacts unless they are kept
    pub fn on_generation_end(&mut self, prompt: &mut PromptBuild) -> usize {
        if self.live.is_empty() {
            return 0;
        }
        if self.settings.keep_in_history {
            tracing::debug!(kept = self.live.len(), "keeping injected context in history");
            self.live.clear();
            return 0;
        }
        let removed = remove_from_prompt(prompt, &self.live);
        self.live.clear();
        removed
    }

    /// Conversation-changed event: re-resolves the mode and drops per-turn state
    pub fn on_conversation_changed(&mut self, conversation: Option<ConversationId>) -> InjectionMode {
        if !self.live.is_empty() {
            // Still removed by the next generation-end or prompt-ready event.
            tracing::debug!(
                pending = self.live.len(),
                "conversation changed before generation ended"
            );
        }
        self.pending_manual = None;
        self.coordinator.reset();
        self.modes.switch_conversation(&self.settings, conversation)
    }

    /// Replaces the settings; any write invalidates cached retrievals
    pub fn update_settings(&mut self, settings: Settings) -> InjectionMode {
        self.settings = settings.sanitized();
        self.coordinator.invalidate_cache();
        self.modes.on_settings_changed(&self.settings)
    }

    pub fn set_global_mode(&mut self, mode: InjectionMode) -> InjectionMode {
        let mut settings = self.settings.clone();
        settings.mode = mode;
        self.update_settings(settings)
    }

    /// Sets or clears (`Inherit`) the override for the active conversation
    pub fn set_conversation_mode(&mut self, mode: ConversationMode) -> Result<InjectionMode, ModeError> {
        let resolved = self.modes.set_override(&mut self.settings, mode)?;
        self.coordinator.invalidate_cache();
        Ok(resolved)
    }

    /// Explicit retrieval. Outside disabled mode the result is held for
    /// exactly one upcoming prompt; in disabled mode it is only returned.
    pub async fn manual_fetch(&mut self, text: &str) -> Result<RetrievalResult, RetrievalError> {
        let Some(query) = Query::parse(text, 1) else {
            return Err(RetrievalError::EmptyResult);
        };

        self.pending_manual = None;
        self.coordinator
            .start_fetch(query.clone(), &self.settings, FetchOrigin::Manual);
        let deadline = self.settings.timeout() + PROMPT_WAIT_GRACE;
        self.coordinator.await_result(deadline).await;

        let result = match self.coordinator.finish_cycle() {
            CycleOutcome::Context { result, .. } => result,
            CycleOutcome::Failed { error, .. } => {
                error.log(query.as_str());
                return Err(error);
            }
            CycleOutcome::Pending { .. } | CycleOutcome::Idle => {
                return Err(RetrievalError::Timeout {
                    timeout_ms: self.settings.timeout_ms,
                });
            }
        };

        if self.modes.effective() != InjectionMode::Disabled {
            tracing::info!(query = %query, chunks = result.len(), "manual context held for next prompt");
            self.pending_manual = Some(PendingManual {
                query,
                result: result.clone(),
            });
        }
        Ok(result)
    }

    /// Splices a caller-chosen result; the artifact is cleaned up like any other
    pub fn splice(&mut self, prompt: &mut PromptBuild, result: &RetrievalResult) -> Option<InjectionArtifact> {
        let mut outcome = PromptOutcome::default();
        self.splice_into(prompt, result, ContextSource::Manual, &mut outcome);
        outcome.artifact
    }

    fn splice_into(
        &mut self,
        prompt: &mut PromptBuild,
        result: &RetrievalResult,
        source: ContextSource,
        outcome: &mut PromptOutcome,
    ) {
        let Some(artifact) = self.splicer.inject(prompt, result, &self.settings) else {
            return;
        };
        tracing::info!(chunks = result.len(), ?source, "lore injected");
        if self.settings.show_preview {
            outcome.preview = Some(artifact.text.clone());
        }
        self.live.push(artifact.clone());
        outcome.artifact = Some(artifact);
        outcome.source = Some(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ChatMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        calls: AtomicUsize,
        outcome: Result<RetrievalResult, RetrievalError>,
    }

    #[async_trait]
    impl RetrievalBackend for Fixed {
        async fn retrieve(
            &self,
            _query: &Query,
            _settings: &Settings,
        ) -> Result<RetrievalResult, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn fixed(outcome: Result<RetrievalResult, RetrievalError>) -> Arc<Fixed> {
        Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            outcome,
        })
    }

    fn settings() -> Settings {
        Settings {
            inject_prefix: "P".to_string(),
            inject_suffix: "S".to_string(),
            ..Settings::default()
        }
    }

    fn prompt() -> PromptBuild {
        PromptBuild::from_messages(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("tell me about the dragon"),
        ])
    }

    #[tokio::test]
    async fn test_auto_cycle_injects_then_cleans_up() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A", "B"])));
        let mut injector = ContextInjector::new(settings(), backend.clone());
        let mut prompt = prompt();
        let original = prompt.clone();

        assert!(matches!(
            injector.on_user_input("tell me about the dragon"),
            InputDecision::Started(_)
        ));
        let outcome = injector.on_prompt_ready(&mut prompt).await;
        assert!(outcome.injected());
        assert_eq!(outcome.source, Some(ContextSource::Automatic));
        assert_eq!(
            prompt.message_slice().iter().filter(|m| m.content == "PA\n...\nBS").count(),
            1
        );

        assert_eq!(injector.on_generation_end(&mut prompt), 1);
        assert_eq!(prompt, original);
        assert_eq!(injector.on_generation_end(&mut prompt), 0);
    }

    #[tokio::test]
    async fn test_keep_in_history_leaves_artifact() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(
            Settings {
                keep_in_history: true,
                ..settings()
            },
            backend,
        );
        let mut prompt = prompt();
        injector.on_user_input("tell me about the dragon");
        injector.on_prompt_ready(&mut prompt).await;
        assert_eq!(injector.on_generation_end(&mut prompt), 0);
        assert!(prompt.message_slice().iter().any(ChatMessage::is_injected));
        assert!(injector.live_artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_never_fetches() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(
            Settings {
                mode: InjectionMode::Disabled,
                ..settings()
            },
            backend.clone(),
        );
        let mut prompt = prompt();
        assert_eq!(
            injector.on_user_input("a perfectly good question"),
            InputDecision::Skipped(SkipReason::Disabled)
        );
        let outcome = injector.on_prompt_ready(&mut prompt).await;
        assert!(!outcome.injected());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_manual_result_used_exactly_once() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(
            Settings {
                mode: InjectionMode::Manual,
                ..settings()
            },
            backend.clone(),
        );
        assert_eq!(
            injector.on_user_input("tell me about the dragon"),
            InputDecision::Skipped(SkipReason::ManualMode)
        );
        assert!(injector.manual_fetch("dragon").await.is_ok());
        assert!(matches!(injector.status(), InjectorStatus::ManualPending { .. }));

        let mut first = prompt();
        assert_eq!(
            injector.on_prompt_ready(&mut first).await.source,
            Some(ContextSource::Manual)
        );
        injector.on_generation_end(&mut first);

        let mut second = prompt();
        assert!(!injector.on_prompt_ready(&mut second).await.injected());
        assert_eq!(injector.status(), InjectorStatus::Idle);
    }

    #[tokio::test]
    async fn test_manual_fetch_in_disabled_mode_is_returned_not_held() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(
            Settings {
                mode: InjectionMode::Disabled,
                ..settings()
            },
            backend,
        );
        let result = injector.manual_fetch("dragon").await;
        assert_eq!(result.as_ref().map(RetrievalResult::joined), Ok("A".to_string()));
        assert_eq!(injector.status(), InjectorStatus::Idle);

        let mut prompt = prompt();
        let Ok(result) = result else {
            panic!("manual fetch should succeed");
        };
        assert!(injector.splice(&mut prompt, &result).is_some());
        assert_eq!(injector.on_generation_end(&mut prompt), 1);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_notice() {
        let backend = fixed(Err(RetrievalError::HttpStatus {
            status: 503,
            body: "down".to_string(),
        }));
        let mut injector = ContextInjector::new(settings(), backend);
        let mut prompt = prompt();
        let original = prompt.clone();
        injector.on_user_input("tell me about the dragon");
        let outcome = injector.on_prompt_ready(&mut prompt).await;
        assert!(!outcome.injected());
        assert!(matches!(outcome.notice, Some(RetrievalNotice::Warning(_))));
        assert_eq!(prompt, original);
    }

    #[tokio::test]
    async fn test_unconfigured_is_silent() {
        let backend = fixed(Err(RetrievalError::Unconfigured));
        let mut injector = ContextInjector::new(settings(), backend);
        let mut prompt = prompt();
        injector.on_user_input("tell me about the dragon");
        let outcome = injector.on_prompt_ready(&mut prompt).await;
        assert_eq!(outcome, PromptOutcome::default());
    }

    #[tokio::test]
    async fn test_settings_write_invalidates_cache() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(settings(), backend.clone());
        for _ in 0..2 {
            let mut prompt = prompt();
            injector.on_user_input("tell me about the dragon");
            injector.on_prompt_ready(&mut prompt).await;
            injector.on_generation_end(&mut prompt);
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let mut changed = injector.settings().clone();
        changed.similarity_threshold = 0.8;
        injector.update_settings(changed);
        let mut prompt = prompt();
        injector.on_user_input("tell me about the dragon");
        injector.on_prompt_ready(&mut prompt).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conversation_override_and_switch() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(settings(), backend);
        injector.on_conversation_changed(Some(ConversationId::new("a")));
        assert_eq!(
            injector.set_conversation_mode(ConversationMode::Disabled),
            Ok(InjectionMode::Disabled)
        );
        assert_eq!(
            injector.on_user_input("tell me about the dragon"),
            InputDecision::Skipped(SkipReason::Disabled)
        );

        assert_eq!(
            injector.on_conversation_changed(Some(ConversationId::new("b"))),
            InjectionMode::Auto
        );
        assert_eq!(injector.conversation_mode(), ConversationMode::Inherit);
        assert_eq!(
            injector.on_conversation_changed(Some(ConversationId::new("a"))),
            InjectionMode::Disabled
        );
    }

    #[tokio::test]
    async fn test_stale_artifacts_removed_at_next_prompt() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(settings(), backend);
        let mut prompt = prompt();
        injector.on_user_input("tell me about the dragon");
        injector.on_prompt_ready(&mut prompt).await;
        // no generation-end event for that cycle
        injector.on_user_input("tell me about the dragon");
        injector.on_prompt_ready(&mut prompt).await;
        assert_eq!(
            prompt.message_slice().iter().filter(|m| m.is_injected()).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_switch_mid_cycle_still_cleans_up() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(settings(), backend);
        injector.on_conversation_changed(Some(ConversationId::new("a")));
        let mut prompt = prompt();
        let original = prompt.clone();
        injector.on_user_input("tell me about the dragon");
        assert!(injector.on_prompt_ready(&mut prompt).await.injected());

        injector.on_conversation_changed(Some(ConversationId::new("b")));
        assert_eq!(injector.live_artifacts().len(), 1);
        assert_eq!(injector.on_generation_end(&mut prompt), 1);
        assert_eq!(prompt, original);
        assert!(injector.live_artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_switch_mid_cycle_cleaned_at_next_prompt() {
        let backend = fixed(Ok(RetrievalResult::from_texts(["A"])));
        let mut injector = ContextInjector::new(
            Settings {
                mode: InjectionMode::Manual,
                ..settings()
            },
            backend,
        );
        injector.on_conversation_changed(Some(ConversationId::new("a")));
        assert!(injector.manual_fetch("dragon").await.is_ok());
        let mut prompt = prompt();
        let original = prompt.clone();
        assert!(injector.on_prompt_ready(&mut prompt).await.injected());

        injector.on_conversation_changed(Some(ConversationId::new("b")));
        let outcome = injector.on_prompt_ready(&mut prompt).await;
        assert!(!outcome.injected());
        assert_eq!(prompt, original);
    }
}
