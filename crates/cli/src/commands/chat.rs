//! `parley chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use parley_agent::{ChatSession, ChatTurn, SessionSettings};
use parley_config::AppConfig;
use parley_core::engine::InferenceEngine;
use parley_core::message::ConversationId;
use parley_memory::{InMemoryHistory, TranscriptWriter};
use parley_telemetry::{LogBook, LogLevel, channels};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub async fn run(
    config: AppConfig,
    message: Option<String>,
    resume: Option<String>,
) -> anyhow::Result<()> {
    let log_book = Arc::new(LogBook::to_dir(&config.logging.logs_dir));

    let mut history = InMemoryHistory::new();
    if config.logging.transcripts {
        history = history.with_transcripts(TranscriptWriter::new(
            config.logging.logs_dir.join(channels::CHAT),
        ));
    }
    let history = Arc::new(history);

    let resumed = match resume {
        Some(raw) => {
            let id = ConversationId::from(raw.as_str());
            let restored = history.resume(&id).await?;
            Some((id, restored))
        }
        None => None,
    };

    let engine = load_engine(&config, &log_book).await?;
    let session = ChatSession::new(
        Arc::clone(&engine),
        history,
        log_book,
        SessionSettings::from_config(&config),
    );

    let id = match &resumed {
        Some((id, restored)) => {
            info!(conversation_id = %id, restored, "Resumed conversation");
            id.clone()
        }
        None => session.open_conversation().await?,
    };
    info!(
        conversation_id = %id,
        model = engine.name(),
        single_shot = message.is_some(),
        "Chat started"
    );

    if let Some(msg) = message {
        let turn = session.query(&id, &msg).await?;
        print_turn(turn, "").await?;
    } else {
        println!();
        println!("  Parley Interactive Mode");
        println!();
        println!("  Model:         {}", engine.name());
        println!("  Device:        {}", config.model.device);
        println!("  Conversation:  {id}");
        if let Some((_, restored)) = &resumed {
            println!("  Resumed:       {restored} messages");
        }
        println!();
        println!("  Type your message and press Enter.");
        println!("  Type 'exit' or 'quit' to leave.");
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        prompt()?;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                break;
            }
            if !line.is_empty() {
                match session.query(&id, line).await {
                    Ok(turn) => {
                        if let Err(e) = print_turn(turn, "  Assistant > ").await {
                            eprintln!("  [Error] {e}");
                        }
                    }
                    Err(e) => {
                        warn!(conversation_id = %id, error = %e, "Query failed");
                        eprintln!("  [Error] {e}");
                    }
                }
                println!();
            }
            prompt()?;
        }

        session.close_conversation(&id).await?;
        println!();
        println!("  Goodbye!");
        println!();
    }

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Print chunks as they arrive.
async fn print_turn(mut turn: ChatTurn, prefix: &str) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    print!("{prefix}");
    while let Some(chunk) = turn.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                println!();
                return Err(e.into());
            }
        };
        print!("{chunk}");
        stdout.flush()?;
    }
    println!();
    Ok(())
}

#[cfg(feature = "local")]
async fn load_engine(
    config: &AppConfig,
    log_book: &LogBook,
) -> anyhow::Result<Arc<dyn InferenceEngine>> {
    use anyhow::Context;
    use parley_providers::LocalEngine;

    let model = config.model.name.clone();
    let device = config.model.device.clone();
    eprintln!("  Loading {model} on {device}...");

    let loaded = tokio::task::spawn_blocking(move || LocalEngine::load(&model, &device))
        .await
        .context("Model loader task failed")?;

    match loaded {
        Ok(engine) => {
            info!(engine = engine.name(), "Model loaded");
            log_book.log(
                channels::LLM,
                "load_model",
                LogLevel::Info,
                format!("Loaded {}", engine.name()),
                true,
            );
            Ok(Arc::new(engine))
        }
        Err(e) => {
            log_book.log(
                channels::LLM,
                "load_model",
                LogLevel::Error,
                format!("Error loading model: {e}"),
                true,
            );
            Err(e).with_context(|| format!("Failed to load model '{}'", config.model.name))
        }
    }
}

#[cfg(not(feature = "local"))]
async fn load_engine(
    config: &AppConfig,
    log_book: &LogBook,
) -> anyhow::Result<Arc<dyn InferenceEngine>> {
    log_book.log(
        channels::LLM,
        "load_model",
        LogLevel::Error,
        format!("Cannot load '{}': local inference not compiled in", config.model.name),
        false,
    );
    anyhow::bail!(
        "Local inference is not compiled into this build.\n  \
         Rebuild with: cargo install parley --features local"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.logging.logs_dir = dir.join("logs");
        config
    }

    #[tokio::test]
    async fn resume_rejects_ids_outside_the_transcript_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());

        let err = run(config, Some("Hi".into()), Some("../../escaped".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a valid transcript name"));
        assert!(!tmp.path().join("escaped.jsonl").exists());
    }

    #[tokio::test]
    async fn resume_of_unknown_conversation_fails_before_model_load() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run(config_in(tmp.path()), None, Some("ghost".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown conversation"));
    }
}
