//! Line protocol over stdin/stdout.
//!
//! - Plain lines are sent to the Mirror; the reply prints as it streams
//! - Lines starting with `#` are commands (see [`print_commands`])

use narrative_core::{
    EventContent, Language, NarrativeEvent, NarrativeSession, SynthesisOutcome, TheaterOutcome,
};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Theater(String),
    Promote(usize),
    Core,
    Archive,
    Lang(Language),
    Help,
    Quit,
    Invalid(String),
}

impl Command {
    /// Parse one trimmed, non-empty line.
    pub fn parse(line: &str) -> Self {
        let Some(command) = line.strip_prefix('#') else {
            return Command::Say(line.to_string());
        };
        let (name, rest) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match name {
            "quit" | "exit" => Command::Quit,
            "help" => Command::Help,
            "core" => Command::Core,
            "archive" => Command::Archive,
            "theater" if !rest.is_empty() => Command::Theater(rest.to_string()),
            "theater" => Command::Invalid("Usage: #theater <text>".to_string()),
            "promote" => match rest.parse::<usize>() {
                Ok(n) if n > 0 => Command::Promote(n),
                _ => Command::Invalid("Usage: #promote <n> (see #archive)".to_string()),
            },
            "lang" => match rest.parse::<Language>() {
                Ok(language) => Command::Lang(language),
                Err(e) => Command::Invalid(e.to_string()),
            },
            _ => Command::Invalid("Unknown command. Type #help for help.".to_string()),
        }
    }
}

pub fn print_commands() {
    println!("Commands:");
    println!("  #theater <text> - Deconstruct a conflict");
    println!("  #promote <n>    - Send archive entry n to the Theater");
    println!("  #core           - Synthesize the constellation");
    println!("  #archive        - List the narrative log, newest first");
    println!("  #lang en|zh     - Switch language");
    println!("  #help           - Show this help");
    println!("  #quit           - Exit");
    println!("  (anything else is said to the Mirror)");
}

/// Drive `session` from stdin until EOF or `#quit`.
pub async fn run(mut session: NarrativeSession) -> io::Result<()> {
    println!("=== Dasein ({}) ===", session.language());
    for turn in session.mirror().turns() {
        println!("[MIRROR] {}", turn.text);
    }
    println!();
    print_commands();
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = Command::parse(line);
        debug!(?command, "Dispatching input line");
        match command {
            Command::Quit => {
                println!("Goodbye.");
                break;
            }
            Command::Help => print_commands(),
            Command::Say(text) => say(&session, &text, &mut stdout).await?,
            Command::Theater(text) => {
                if let Some(outcome) = session.deconstruct(&text).await {
                    print_outcome(&outcome);
                }
            }
            Command::Promote(n) => promote(&session, n).await,
            Command::Core => print_synthesis(&session.synthesize().await),
            Command::Archive => print_archive(&session.archive()),
            Command::Lang(language) => {
                session.set_language(language);
                println!("[LANG] {language}");
            }
            Command::Invalid(message) => println!("[ERROR] {message}"),
        }
        stdout.flush()?;
    }

    info!(events = session.store().len(), "Headless session ended");
    Ok(())
}

async fn say(session: &NarrativeSession, text: &str, stdout: &mut io::Stdout) -> io::Result<()> {
    let Some(mut reply) = session.say(text).await else {
        return Ok(());
    };

    print!("[MIRROR] ");
    let mut printed = 0;
    while let Some(partial) = reply.next().await {
        print!("{}", &partial[printed..]);
        printed = partial.len();
        stdout.flush()?;
    }
    println!();
    println!();
    Ok(())
}

async fn promote(session: &NarrativeSession, n: usize) {
    let Some(event) = session.archive().into_iter().nth(n - 1) else {
        println!("[ERROR] No archive entry {n}");
        return;
    };

    match session.promote(event.id()) {
        Ok(text) => {
            println!("[PROMOTED] {text}");
            if let Some(outcome) = session.deconstruct_draft().await {
                print_outcome(&outcome);
            }
        }
        Err(e) => println!("[ERROR] {e}"),
    }
}

fn print_outcome(outcome: &TheaterOutcome) {
    let analysis = &outcome.analysis;
    println!("[THEATER]");
    println!("  Id:        {}", analysis.id_voice);
    println!("  Superego:  {}", analysis.superego_voice);
    println!("  Symptom:   {}", analysis.symptom);
    println!("  Emotion:   {}", analysis.emotional_state);
    println!("  Authorship: {}", analysis.authorship);
    if outcome.saved {
        println!("  (saved to history)");
    }
    println!();
}

fn print_synthesis(outcome: &SynthesisOutcome) {
    match outcome {
        SynthesisOutcome::EmptyHistory => {
            println!("[CORE] The void. Speak to the Mirror or stage a conflict first.")
        }
        SynthesisOutcome::Failed => println!("[CORE] Synthesis failed; try #core again."),
        SynthesisOutcome::Superseded => println!("[CORE] Superseded by a newer synthesis."),
        SynthesisOutcome::Synthesized(signifiers) => {
            println!("[CORE]");
            let mut ranked: Vec<_> = signifiers.iter().collect();
            ranked.sort_by(|a, b| b.weight.cmp(&a.weight));
            for s in ranked {
                println!("  {} {}", "*".repeat(usize::from(s.weight)), s.text);
                println!("      {}", s.insight);
            }
        }
    }
    println!();
}

fn print_archive(events: &[NarrativeEvent]) {
    if events.is_empty() {
        println!("[ARCHIVE] empty");
        return;
    }
    println!("[ARCHIVE]");
    for (i, event) in events.iter().enumerate() {
        let when = event.timestamp().format("%Y-%m-%d %H:%M");
        match event.content() {
            EventContent::LogEntry(text) => println!("  {:>3}. {when} LOG  {text}", i + 1),
            EventContent::TensionAnalysis(analysis) => {
                println!("  {:>3}. {when} KNOT {}", i + 1, analysis.symptom)
            }
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_go_to_mirror() {
        assert_eq!(Command::parse("I feel stuck"), Command::Say("I feel stuck".to_string()));
    }

    #[test]
    fn test_commands_parse() {
        assert_eq!(Command::parse("#quit"), Command::Quit);
        assert_eq!(Command::parse("#core"), Command::Core);
        assert_eq!(Command::parse("#archive"), Command::Archive);
        assert_eq!(Command::parse("#promote 2"), Command::Promote(2));
        assert_eq!(Command::parse("#lang en"), Command::Lang(Language::En));
        assert_eq!(
            Command::parse("#theater  I want to leave but I stay"),
            Command::Theater("I want to leave but I stay".to_string())
        );
    }

    #[test]
    fn test_bad_arguments_are_invalid() {
        assert!(matches!(Command::parse("#promote 0"), Command::Invalid(_)));
        assert!(matches!(Command::parse("#promote x"), Command::Invalid(_)));
        assert!(matches!(Command::parse("#theater"), Command::Invalid(_)));
        assert!(matches!(Command::parse("#lang fr"), Command::Invalid(_)));
        assert!(matches!(Command::parse("#dance"), Command::Invalid(_)));
    }
}
