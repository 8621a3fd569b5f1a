//! Stream a chat completion from a Vault AI backend to stdout.
//!
//! Reads `.env` first, then `VAULT_API_URL`, `VAULT_API_TIMEOUT_SECS` and
//! `VAULT_API_TOKEN`. Ctrl-C aborts the stream in flight.

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt as _;
use tracing::info;
use vault_client::fixture::{FixtureStream, event_stream_payload};
use vault_client::prelude::*;
use vault_client::{EventStream, decode_event_stream, init_observability};

/// Exit code used when the user cancels, matching shell convention for SIGINT.
const EXIT_CANCELLED: u8 = 130;

/// How a printed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    Interrupted,
    Cancelled,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Complete => ExitCode::SUCCESS,
            Outcome::Interrupted => ExitCode::FAILURE,
            Outcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "vault-chat", about = "Stream a chat completion to stdout")]
struct Args {
    /// Prompt sent as the user message.
    #[arg(required_unless_present = "fixture")]
    prompt: Option<String>,
    /// Backend base URL; overrides VAULT_API_URL.
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long, default_value = "vault-default")]
    model: String,
    /// Optional system prompt.
    #[arg(long)]
    system: Option<String>,
    /// Request timeout; overrides VAULT_API_TIMEOUT_SECS.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Request one JSON completion instead of a stream.
    #[arg(long)]
    no_stream: bool,
    /// Replay a synthetic stream of TEXT offline instead of calling the backend.
    #[arg(long, value_name = "TEXT")]
    fixture: Option<String>,
    /// Read size used when replaying a fixture.
    #[arg(long, default_value_t = 7)]
    fixture_chunk_size: usize,
}

impl Args {
    fn completion_request(&self) -> CompletionRequest {
        let mut request = CompletionRequest::new(&self.model).stream(!self.no_stream);
        if let Some(system) = self.system.as_deref().filter(|s| !s.trim().is_empty()) {
            request = request.system(system);
        }
        request.user(self.prompt.clone().unwrap_or_default())
    }

    fn client_config(&self) -> Result<ClientConfig, vault_client::ConfigError> {
        let mut config = match &self.base_url {
            Some(url) => ClientConfig::new(url),
            None => ClientConfig::from_env()?,
        };
        if let Some(secs) = self.timeout_secs.filter(|secs| *secs > 0) {
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_observability();
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let abort = AbortHandle::new();
    let on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.abort();
        }
    });

    if let Some(text) = &args.fixture {
        let payload = event_stream_payload(text);
        let source = FixtureStream::from_payload(payload.as_bytes(), args.fixture_chunk_size);
        return Ok(print_events(decode_event_stream(source, Some(abort.signal())))
            .await?
            .into());
    }

    let transport = TransportClient::new(args.client_config()?, Arc::new(EnvToken::default()))?;
    let client = CompletionClient::new(transport);
    let request = args.completion_request();

    if args.no_stream {
        let value = client.complete(&request, Some(abort.signal())).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(ExitCode::SUCCESS);
    }
    Ok(print_events(client.stream(&request, Some(abort.signal())))
        .await?
        .into())
}

async fn print_events(mut events: EventStream) -> std::io::Result<Outcome> {
    let mut stdout = std::io::stdout();
    let mut chunks = 0_u64;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Chunk {
                content_delta: Some(text),
                ..
            } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
                chunks += 1;
            }
            StreamEvent::Chunk { .. } => {}
            StreamEvent::Done => {
                writeln!(stdout)?;
                info!(event = "cli.generation_complete", chunks, "generation complete");
                return Ok(Outcome::Complete);
            }
            StreamEvent::Error { cause } => {
                writeln!(stdout)?;
                eprintln!(
                    "generation interrupted: {cause} (status {})",
                    cause.status_code
                );
                return Ok(Outcome::Interrupted);
            }
        }
    }
    writeln!(stdout)?;
    eprintln!("generation cancelled");
    Ok(Outcome::Cancelled)
}
