//! Target language for prompts, sentinels and the welcome turn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Language the model should answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// English.
    En,
    /// Simplified Chinese.
    #[default]
    Zh,
}

impl Language {
    /// Name of the language as written into prompts.
    pub fn prompt_name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Zh => "Chinese (Simplified)",
        }
    }

    /// Text appended to a streamed reply when the stream fails.
    pub fn connection_lost(self) -> &'static str {
        match self {
            Language::En => "Connection lost.",
            Language::Zh => "连接中断。",
        }
    }

    /// Opening model turn of a fresh Mirror session.
    pub fn mirror_welcome(self) -> &'static str {
        match self {
            Language::En => {
                "I am the Mirror. Record your unstructured thoughts. Your words form the raw material of your constellation."
            }
            Language::Zh => "我是镜像。在此记录你的非结构化思绪。你的每一句话都是构建星图的原材料。",
        }
    }

    /// Short code (`en` / `zh`).
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unrecognized language code.
#[derive(Debug, Error)]
#[error("unknown language `{0}` (expected `en` or `zh`)")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "zh" | "chinese" => Ok(Language::Zh),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!(" ZH ".parse::<Language>().unwrap(), Language::Zh);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_sentinels_are_localized() {
        assert_eq!(Language::En.connection_lost(), "Connection lost.");
        assert_ne!(Language::Zh.connection_lost(), Language::En.connection_lost());
    }

    #[test]
    fn test_default_is_chinese() {
        assert_eq!(Language::default(), Language::Zh);
        assert_eq!(Language::default().prompt_name(), "Chinese (Simplified)");
    }
}
