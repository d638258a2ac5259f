use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::api::Client;
use crate::envconfig::EnvConfig;
use crate::events::EventBus;
use crate::format::{human_age, human_bytes};
use crate::fs::FileStore;
use crate::relay::{prompt, InferenceBackend, OutwardEvent, Relay, RelayOutcome};

pub async fn serve(config: EnvConfig, events: Arc<EventBus>) -> Result<()> {
    eprintln!("Starting relay on {} (backend {})", config.listen_addr(), config.ollama_url);
    crate::server::serve(config, events).await
}

/// Streams one answer to stdout through the same relay the server uses.
pub async fn ask(config: &EnvConfig, events: Arc<EventBus>, question: &str, file: Option<&Path>) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        bail!("Pergunta não pode estar vazia");
    }

    let context = match file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let client = Client::new(&config.ollama_url, config.timeout())?;
    let relay = Relay::new(Arc::new(client), events, config.timeout());
    let request = prompt::build_request(&config.model, question, context.as_deref(), true);

    let (mut rx, session) = relay.start(request);
    let mut stdout = io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            OutwardEvent::Token(text) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            OutwardEvent::Done => println!(),
            OutwardEvent::Error(message) => {
                println!();
                bail!(message);
            }
        }
    }

    match session.await? {
        RelayOutcome::Done { .. } => Ok(()),
        RelayOutcome::Failed(e) => Err(e.into()),
        RelayOutcome::Cancelled { .. } => bail!("relay cancelled"),
    }
}

pub async fn status(config: &EnvConfig) -> Result<()> {
    let client = Client::new(&config.ollama_url, config.timeout())?;

    match client.models().await {
        Ok(models) => {
            println!("online: {}", client.endpoint());
            println!("model:  {}", config.model);
            if !models.iter().any(|m| m == &config.model) {
                println!("warning: {} is not pulled on this backend", config.model);
            }
            println!("\n{:<40}", "AVAILABLE");
            for name in models {
                println!("{:<40}", name);
            }
            Ok(())
        }
        Err(e) => {
            println!("offline: {}", client.endpoint());
            Err(e.into())
        }
    }
}

pub async fn files(config: &EnvConfig) -> Result<()> {
    let store = FileStore::new(&config.upload_dir, config.max_upload_bytes)
        .with_context(|| format!("failed to open {}", config.upload_dir.display()))?;
    let files = store.list().await?;

    if files.is_empty() {
        println!("No uploads in {}", store.root().display());
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!("{:<50} {:<10} MODIFIED", "NAME", "SIZE");
    println!("{}", "-".repeat(72));
    for file in files {
        println!("{:<50} {:<10} {}", file.name, human_bytes(file.size), human_age(file.modified_at, now));
    }
    Ok(())
}

pub async fn version(config: &EnvConfig) -> Result<()> {
    println!("ollama-relay version {}", env!("CARGO_PKG_VERSION"));
    println!("backend: {} ({})", config.ollama_url, config.model);
    Ok(())
}
