//! Engine configuration.

use crate::language::Language;
use tracing::warn;

/// Environment variable naming the model.
pub const MODEL_VAR: &str = "DASEIN_MODEL";
/// Environment variable holding the reply token limit.
pub const MAX_TOKENS_VAR: &str = "DASEIN_MAX_TOKENS";
/// Environment variable holding the language code (`en` / `zh`).
pub const LANGUAGE_VAR: &str = "DASEIN_LANGUAGE";

/// Configuration for a narrative session.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Model to use. `None` keeps the client default.
    pub model: Option<String>,

    /// Maximum tokens per model response.
    pub max_tokens: usize,

    /// Sampling temperature. `None` keeps the API default.
    pub temperature: Option<f32>,

    /// Language every prompt asks for.
    pub language: Language,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 2048,
            temperature: None,
            language: Language::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the process environment.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(model) = lookup(MODEL_VAR).filter(|m| !m.trim().is_empty()) {
            config.model = Some(model.trim().to_string());
        }

        if let Some(raw) = lookup(MAX_TOKENS_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_tokens = n,
                _ => warn!(value = %raw, var = MAX_TOKENS_VAR, "Ignoring invalid max tokens"),
            }
        }

        if let Some(raw) = lookup(LANGUAGE_VAR) {
            match raw.parse::<Language>() {
                Ok(language) => config.language = language,
                Err(e) => warn!(error = %e, var = LANGUAGE_VAR, "Ignoring invalid language"),
            }
        }

        config
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set max tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the language.
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }
}
