use color_eyre::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PREFIX: &str = "\n[Relevant excerpts from the original novel for this scene:\n";
pub const DEFAULT_SUFFIX: &str = "\n]\n";

/// Injection mode, either as the global default or as a resolved effective mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionMode {
    #[default]
    Auto,
    Manual,
    Disabled,
}

/// Per-conversation mode override; `Inherit` defers to the global mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Inherit,
    Auto,
    Manual,
    Disabled,
}

impl ConversationMode {
    #[must_use]
    pub fn fixed(self) -> Option<InjectionMode> {
        match self {
            Self::Inherit => None,
            Self::Auto => Some(InjectionMode::Auto),
            Self::Manual => Some(InjectionMode::Manual),
            Self::Disabled => Some(InjectionMode::Disabled),
        }
    }
}

impl From<InjectionMode> for ConversationMode {
    fn from(mode: InjectionMode) -> Self {
        match mode {
            InjectionMode::Auto => Self::Auto,
            InjectionMode::Manual => Self::Manual,
            InjectionMode::Disabled => Self::Disabled,
        }
    }
}

impl std::str::FromStr for ConversationMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "inherit" | "global" | "default" => Ok(Self::Inherit),
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "disabled" | "off" => Ok(Self::Disabled),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Chat backend used by the bundled host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub ollama_url: String,
    pub model: String,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model: "gemma3:12b".to_string(),
            system_prompt: "You are a storyteller. Stay consistent with the source material \
                provided as background knowledge, but never quote the markers around it."
                .to_string(),
        }
    }
}

/// Lore injection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub dataset_id: String,
    pub similarity_threshold: f32,
    pub max_chunks: usize,
    pub use_knowledge_graph: bool,
    pub keyword_match: bool,
    pub rerank_id: Option<i64>,
    pub timeout_ms: u64,
    pub inject_prefix: String,
    pub inject_suffix: String,
    pub mode: InjectionMode,
    pub per_conversation_mode: BTreeMap<String, ConversationMode>,
    pub keep_in_history: bool,
    pub debug_mode: bool,
    pub show_preview: bool,
    pub min_query_chars: usize,
    pub retrieval_path: String,
    pub chat: ChatConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:9380".to_string(),
            api_key: String::new(),
            dataset_id: String::new(),
            similarity_threshold: 0.5,
            max_chunks: 3,
            use_knowledge_graph: false,
            keyword_match: false,
            rerank_id: None,
            timeout_ms: 5_000,
            inject_prefix: DEFAULT_PREFIX.to_string(),
            inject_suffix: DEFAULT_SUFFIX.to_string(),
            mode: InjectionMode::Auto,
            per_conversation_mode: BTreeMap::new(),
            keep_in_history: false,
            debug_mode: false,
            show_preview: false,
            min_query_chars: 5,
            retrieval_path: "/api/v1/retrieval".to_string(),
            chat: ChatConfig::default(),
        }
    }
}

impl Settings {
    /// True when both the credential and the dataset are present
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.dataset_id.trim().is_empty()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    /// Full retrieval endpoint, tolerant of stray slashes on either side
    #[must_use]
    pub fn retrieval_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.retrieval_path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Coerces out-of-range values the way the settings form would
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.similarity_threshold = if self.similarity_threshold.is_finite() {
            self.similarity_threshold.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.max_chunks = self.max_chunks.max(1);
        self.timeout_ms = self.timeout_ms.max(1);
        self.min_query_chars = self.min_query_chars.max(1);
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.per_conversation_mode
            .retain(|_, mode| *mode != ConversationMode::Inherit);
        self
    }

    /// Loads settings from the default location, creating the file if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let settings = Settings::default();
            settings.save_to(path)?;
            return Ok(settings);
        }

        let contents = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        Ok(settings.sanitized())
    }

    /// Saves settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Returns the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "lorekeeper")
            .ok_or_else(|| color_eyre::eyre::eyre!("Could not determine config directory"))?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert_eq!(settings.mode, InjectionMode::Auto);
        assert!((settings.similarity_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(settings.max_chunks, 3);
        assert_eq!(settings.timeout_ms, 5_000);
        assert!(!settings.keep_in_history);
        assert!(!settings.is_configured());
    }

    #[test]
    fn test_sanitized_clamps_ranges() {
        let settings = Settings {
            similarity_threshold: 3.0,
            max_chunks: 0,
            timeout_ms: 0,
            min_query_chars: 0,
            base_url: " http://rag.local/ ".to_string(),
            ..Settings::default()
        }
        .sanitized();
        assert!((settings.similarity_threshold - 1.0).abs() < f32::EPSILON);
        assert_eq!(settings.max_chunks, 1);
        assert_eq!(settings.timeout_ms, 1);
        assert_eq!(settings.min_query_chars, 1);
        assert_eq!(settings.base_url, "http://rag.local");
    }

    #[test]
    fn test_retrieval_url_joins_cleanly() {
        let settings = Settings {
            base_url: "http://rag.local/".to_string(),
            retrieval_path: "/api/v1/retrieval".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.retrieval_url(), "http://rag.local/api/v1/retrieval");
    }

    #[test]
    fn test_blank_credentials_are_unconfigured() {
        let settings = Settings {
            api_key: "   ".to_string(),
            dataset_id: "books".to_string(),
            ..Settings::default()
        };
        assert!(!settings.is_configured());
    }

    #[test]
    fn test_conversation_mode_parsing() {
        assert_eq!("inherit".parse::<ConversationMode>(), Ok(ConversationMode::Inherit));
        assert_eq!(" Manual ".parse::<ConversationMode>(), Ok(ConversationMode::Manual));
        assert!("sometimes".parse::<ConversationMode>().is_err());
        assert_eq!(ConversationMode::Inherit.fixed(), None);
        assert_eq!(ConversationMode::Disabled.fixed(), Some(InjectionMode::Disabled));
    }

    #[test]
    fn test_partial_toml_uses_field_defaults() {
        let settings: Settings = match toml::from_str("api_key = \"k\"\nmode = \"manual\"\n") {
            Ok(settings) => settings,
            Err(error) => panic!("partial config should parse: {}", error),
        };
        assert_eq!(settings.api_key, "k");
        assert_eq!(settings.mode, InjectionMode::Manual);
        assert_eq!(settings.max_chunks, 3);
    }

    #[test]
    fn test_load_creates_default_file_and_round_trips() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir: {}", error),
        };
        let path = dir.path().join("nested").join("config.toml");
        let created = Settings::load_from(&path).ok();
        assert_eq!(created, Some(Settings::default()));
        assert!(path.exists());

        let mut edited = Settings::default();
        edited.dataset_id = "novel".to_string();
        edited
            .per_conversation_mode
            .insert("chat-1".to_string(), ConversationMode::Disabled);
        assert!(edited.save_to(&path).is_ok());
        let reloaded = Settings::load_from(&path).ok();
        assert_eq!(reloaded, Some(edited));
    }
}
