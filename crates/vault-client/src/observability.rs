use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

/// Filter used when neither `VAULT_LOG_LEVEL` nor `RUST_LOG` is set: client
/// and CLI events at `info`, dependencies (hyper, reqwest, rustls) at `warn`.
pub const DEFAULT_DIRECTIVES: &str = "warn,vault_client=info,vault_chat=info";

const DEFAULT_LOG_FILE: &str = "vault-client.logs.jsonl";

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Compact lines on stderr, so streamed text on stdout stays clean.
    Stderr,
    /// One JSON object per line, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directives, validated.
    pub directives: String,
    pub sink: LogSink,
}

impl LogSettings {
    /// Resolves settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Resolves settings through `lookup`.
    ///
    /// `VAULT_OBSERVABILITY_ENABLED` switches logging off with `0`, `false`,
    /// `no` or `off`. `VAULT_LOG_LEVEL` wins over `RUST_LOG`. Unparseable
    /// filters fall through to the next source. `VAULT_JSON_LOG_PATH` selects
    /// the JSON file sink.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("VAULT_OBSERVABILITY_ENABLED")
            .is_none_or(|value| !is_switched_off(&value));
        let directives = ["VAULT_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .map(|value| value.trim().to_owned())
            .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
            .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_owned());
        let sink = lookup("VAULT_JSON_LOG_PATH")
            .filter(|path| !path.trim().is_empty())
            .map_or(LogSink::Stderr, |path| json_sink(Path::new(path.trim())));
        Self {
            enabled,
            directives,
            sink,
        }
    }
}

fn is_switched_off(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off" | "disabled"
    )
}

fn json_sink(path: &Path) -> LogSink {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    LogSink::JsonFile {
        dir: dir.to_path_buf(),
        file_name: file_name.to_owned(),
    }
}

/// Installs the process-wide subscriber once, from [`LogSettings::from_env`].
///
/// Later calls, and calls after another subscriber was installed, do nothing.
pub fn init_observability() {
    INIT.get_or_init(|| install(LogSettings::from_env()));
}

fn install(settings: LogSettings) {
    if !settings.enabled {
        return;
    }
    let filter = EnvFilter::new(&settings.directives);
    match settings.sink {
        LogSink::Stderr => {
            let console = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init();
        }
        LogSink::JsonFile { dir, file_name } => {
            if std::fs::create_dir_all(&dir).is_err() {
                eprintln!("cannot create log directory {}", dir.display());
                return;
            }
            let json = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(json)
                .try_init();
        }
    }
}
