//! Integration tests that call the real Claude API.
//!
//! These tests require ANTHROPIC_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p narrative-core --test api_integration -- --ignored`

use narrative_core::{EngineConfig, EventKind, Language, NarrativeSession, SynthesisOutcome};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

fn live_session() -> NarrativeSession {
    let config = EngineConfig::new()
        .with_max_tokens(1024)
        .with_language(Language::En);
    NarrativeSession::from_config(config).expect("Failed to create session")
}

#[tokio::test]
#[ignore] // Run with: cargo test -p narrative-core --test api_integration -- --ignored
async fn test_mirror_streams_a_reply() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let session = live_session();
    let reply = session
        .say("I keep saying yes to things I don't want to do.")
        .await
        .expect("non-empty input");
    let text = reply.finish().await;

    println!("Mirror: {text}");
    assert!(!text.is_empty());
    assert_ne!(text, Language::En.connection_lost());
    assert_eq!(session.store().len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_theater_then_constellation() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let session = live_session();
    let outcome = session
        .deconstruct("I want to quit my job to paint, but my parents sacrificed everything for my degree.")
        .await
        .expect("non-empty input");

    println!("Theater: {:#?}", outcome.analysis);
    assert!(!outcome.is_failed(), "analysis should succeed");
    assert!(outcome.saved);
    assert_eq!(session.store().all()[0].kind(), EventKind::TensionAnalysis);

    match session.synthesize().await {
        SynthesisOutcome::Synthesized(signifiers) => {
            for s in &signifiers {
                println!("  {} [{}]: {}", s.text, s.weight, s.insight);
                assert!((1..=3).contains(&s.weight));
            }
            assert!(!signifiers.is_empty());
        }
        other => panic!("expected signifiers, got {other:?}"),
    }
}
