//! Prompt templates, embedded at compile time.

use crate::language::Language;

const MIRROR_SYSTEM: &str = include_str!("prompts/mirror_system.txt");
const THEATER: &str = include_str!("prompts/theater.txt");
const CONSTELLATION: &str = include_str!("prompts/constellation.txt");

/// System instruction for the Mirror dialogue.
pub fn mirror_system(language: Language) -> String {
    MIRROR_SYSTEM.replace("{language}", language.prompt_name())
}

/// Extraction prompt for one conflict deconstruction.
pub fn theater(input: &str, language: Language) -> String {
    // Language first, so a literal `{language}` typed by the user stays untouched.
    THEATER
        .replace("{language}", language.prompt_name())
        .replace("{input}", input)
}

/// Synthesis prompt over a serialized history.
pub fn constellation(history: &str, language: Language) -> String {
    CONSTELLATION
        .replace("{language}", language.prompt_name())
        .replace("{history}", history)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_system_names_language() {
        let prompt = mirror_system(Language::En);
        assert!(prompt.contains("Answer in English."));
        assert!(!prompt.contains("{language}"));
    }

    #[test]
    fn test_theater_embeds_input_literally() {
        let prompt = theater("I should write but I {language} scroll", Language::Zh);
        assert!(prompt.contains("\"I should write but I {language} scroll\""));
        assert!(prompt.contains("Chinese (Simplified)"));
        assert!(prompt.contains("Return strictly JSON."));
    }

    #[test]
    fn test_constellation_appends_history() {
        let prompt = constellation("[LOG]: I feel stuck", Language::En);
        assert!(prompt.trim_end().ends_with("[LOG]: I feel stuck"));
        assert!(prompt.contains("5 to 7"));
    }
}
