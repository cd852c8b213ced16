//! Dasein: a headless front end for the narrative synthesis engine.
//!
//! Reads one line at a time from stdin. Plain lines go to the Mirror;
//! lines starting with `#` are commands.
//!
//! ```bash
//! cargo run -p dasein -- --lang en
//! ```

mod headless;

use narrative_core::{EngineConfig, Language, NarrativeSession, SessionError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let mut config = EngineConfig::from_env();
    if let Some(language) = parse_language_arg(&args)? {
        config = config.with_language(language);
    }

    let session = match NarrativeSession::from_config(config) {
        Ok(session) => session,
        Err(e @ SessionError::NoApiKey) => {
            eprintln!("Error: {e}");
            eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    headless::run(session).await?;
    Ok(())
}

fn parse_language_arg(args: &[String]) -> Result<Option<Language>, Box<dyn std::error::Error>> {
    match args.iter().position(|a| a == "--lang") {
        Some(i) => match args.get(i + 1) {
            Some(code) => Ok(Some(code.parse()?)),
            None => Err("--lang needs a value (en or zh)".into()),
        },
        None => Ok(None),
    }
}

fn print_help() {
    println!("Dasein - narrative synthesis in the terminal");
    println!();
    println!("Usage: dasein [--lang en|zh]");
    println!();
    println!("Environment:");
    println!("  ANTHROPIC_API_KEY   API key (required)");
    println!("  DASEIN_MODEL        Model override");
    println!("  DASEIN_MAX_TOKENS   Reply token limit (default 2048)");
    println!("  DASEIN_LANGUAGE     en or zh (default zh)");
    println!("  RUST_LOG            Log filter for stderr (default warn)");
    println!();
    headless::print_commands();
}
