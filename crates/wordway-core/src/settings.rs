use clap::Parser;
use std::path::PathBuf;

use crate::error::{Result, WordwayError};

/// Name of the default data directory under the user's home.
pub const DATA_DIR_NAME: &str = ".wordway";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Background service for the Wordway lookup extension
#[derive(Parser, Debug, Clone)]
#[command(
    name = "wordway",
    about = "Background message broker for the Wordway lookup extension",
    version
)]
pub struct Settings {
    /// Directory holding persisted extension state (defaults to ~/.wordway)
    #[arg(long, env = "WORDWAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Base URL that relative API request paths are resolved against
    #[arg(long, env = "WORDWAY_API_URL", default_value = "http://127.0.0.1:8080/api")]
    pub api_base_url: String,

    /// Page opened for the openOptionsPage message
    #[arg(long, env = "WORDWAY_OPTIONS_URL", default_value = "http://127.0.0.1:8080/options")]
    pub options_url: String,

    /// Storage key the config record is kept under
    #[arg(long, default_value = "config")]
    pub storage_scope: String,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path (stderr when absent; stdout carries the message channel)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Origin of the extension that launched this host; supplied by the browser
    #[arg(value_name = "ORIGIN")]
    pub caller_origin: Option<String>,

    /// Native window handle of the caller; supplied by the browser on Windows
    #[arg(long, hide = true)]
    pub parent_window: Option<String>,
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse the process arguments and resolve derived values.
    pub fn load() -> Result<Self> {
        Self::resolve(Settings::parse())
    }

    /// Same as [`load`] but accepts an explicit argument list, enabling
    /// unit-testing without spawning subprocesses.
    pub fn load_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let settings =
            Settings::try_parse_from(args).map_err(|e| WordwayError::Config(e.to_string()))?;
        Self::resolve(settings)
    }

    /// Directory the config store lives in.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| default_data_dir(dirs::home_dir()))
    }

    /// Fill in the data directory, validate URLs and apply `--debug`.
    fn resolve(mut settings: Settings) -> Result<Settings> {
        if settings.data_dir.is_none() {
            settings.data_dir = Some(default_data_dir(dirs::home_dir()));
        }

        for (name, url) in [
            ("api-base-url", &settings.api_base_url),
            ("options-url", &settings.options_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(WordwayError::Config(format!(
                    "--{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }

        if settings.storage_scope.trim().is_empty() {
            return Err(WordwayError::Config(
                "--storage-scope must not be empty".to_string(),
            ));
        }

        // --debug overrides log level.
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }

        Ok(settings)
    }
}

/// `<home>/.wordway`, or `./.wordway` when the home directory is unknown.
fn default_data_dir(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(|| PathBuf::from(".")).join(DATA_DIR_NAME)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
