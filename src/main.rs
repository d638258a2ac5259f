use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ollama_relay::cmd;
use ollama_relay::envconfig::{EnvConfig, Host};
use ollama_relay::events::EventBus;

#[derive(Parser)]
#[command(name = "ollama-relay")]
#[command(version)]
#[command(about = "Relay Ollama generations to the browser as server-sent events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    Ask {
        question: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    Status,
    #[command(alias = "ls")]
    Files,
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = EnvConfig::from_env();

    let _guard = init_tracing(&config);
    let events = Arc::new(EventBus::with_logging());

    let result = match cli.command {
        Commands::Serve { host, port } => {
            config.host = Host {
                host: host.unwrap_or(config.host.host),
                port: port.unwrap_or(config.host.port),
            };
            cmd::serve(config, events).await
        }
        Commands::Ask { question, file } => cmd::ask(&config, events, &question, file.as_deref()).await,
        Commands::Status => cmd::status(&config).await,
        Commands::Files => cmd::files(&config).await,
        Commands::Version => cmd::version(&config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// stderr always; a non-blocking file layer too when `RELAY_LOG_FILE` is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &EnvConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "relay.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_layer)
        .init();

    guard
}
