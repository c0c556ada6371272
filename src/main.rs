//! Parley - voice conversation loop in the terminal
//!
//! Reads utterances from stdin (or `--say` arguments), answers them with the
//! rule-based policy and "speaks" the answers to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use parley::policy::{RuleEngine, RuleSet};
use parley::session::{ConversationSession, SessionNotification};
use parley::speech::{ConsoleRecognizer, ConsoleSynthesizer, ScriptedRecognizer};
use parley::{ParleyConfig, Speaker};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parley - talk to a rule-based assistant, one turn at a time
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// TOML rule table for the dialogue policy
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Recognition locale (e.g. "en-US")
    #[arg(long)]
    locale: Option<String>,

    /// Run non-interactively with these utterances, in order
    #[arg(long = "say", value_name = "UTTERANCE")]
    say: Vec<String>,

    /// Write the final transcript to this file as JSON
    #[arg(long)]
    transcript: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ParleyConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ParleyConfig::default(),
    };
    if let Some(locale) = cli.locale {
        config.session.locale = locale;
    }
    if let Some(rules) = cli.rules {
        config.rules = Some(rules);
    }

    let policy = match &config.rules {
        Some(path) => {
            let set = RuleSet::load(path)
                .with_context(|| format!("loading rules {}", path.display()))?;
            info!("Loaded {} rules from {}", set.rules.len(), path.display());
            RuleEngine::from_rule_set(set)
        }
        None => RuleEngine::default(),
    };

    let scripted = !cli.say.is_empty();
    let builder = ConversationSession::builder()
        .with_config(config.session.clone())
        .with_policy(policy)
        .with_synthesizer(ConsoleSynthesizer::default());

    // Tells the loop when there is nothing left to hear
    let (builder, input_exhausted): (_, Box<dyn Fn() -> bool>) = if scripted {
        let recognizer = ScriptedRecognizer::saying(cli.say.clone());
        let remaining = recognizer.clone();
        (
            builder.with_recognizer(recognizer),
            Box::new(move || remaining.remaining() == 0),
        )
    } else {
        let recognizer = ConsoleRecognizer::new();
        let closed = recognizer.closed_flag();
        (
            builder.with_recognizer(recognizer),
            Box::new(move || closed.load(Ordering::SeqCst)),
        )
    };

    let (session, handle) = builder.build()?;
    info!("Starting Parley session {}", handle.session_id());
    let worker = session.start()?;

    loop {
        if let Some(notification) = handle.recv_notification_timeout(POLL_INTERVAL) {
            render(&notification, scripted);
        }

        let snapshot = handle.snapshot();
        if !snapshot.state.is_idle() {
            continue;
        }
        if snapshot.conversation_closed || input_exhausted() {
            break;
        }

        handle.start_session()?;
        // Wait for the start to be taken so it is not issued twice
        let epoch = snapshot.epoch;
        if !handle.wait_until(Duration::from_secs(1), |s| s.epoch != epoch) {
            warn!("Session did not react to start request");
        }
    }

    // Drain what presentation has not seen yet
    while let Some(notification) = handle.try_recv_notification() {
        render(&notification, scripted);
    }

    handle.shutdown()?;
    if worker.join().is_err() {
        warn!("Session worker panicked");
    }

    if let Some(path) = cli.transcript {
        let json = handle.transcript_json()?;
        std::fs::write(&path, json)
            .with_context(|| format!("writing transcript {}", path.display()))?;
        info!("Transcript written to {}", path.display());
    }

    Ok(())
}

/// Print what the console adapters do not already show
fn render(notification: &SessionNotification, scripted: bool) {
    match notification {
        SessionNotification::TranscriptUpdated(turns) if scripted => {
            if let Some(turn) = turns.last().filter(|t| t.speaker() == Speaker::User) {
                println!("you> {}", turn.content());
            }
        }
        SessionNotification::Error(e) => eprintln!("! {}", e.user_message()),
        SessionNotification::ConversationEnded => println!("(conversation ended)"),
        _ => {}
    }
}
