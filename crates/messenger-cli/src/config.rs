//! CLI configuration loaded from environment variables.
//!
//! Every setting has a default, so the CLI works with no configuration at
//! all. Command-line flags override what is read here.

use std::path::PathBuf;

use messenger_client::FanOut;
use url::Url;

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Directory holding the database, blobs and the session file.
    pub data_dir: PathBuf,

    /// SQLite document store.
    /// Env: `MESSENGER_DB_PATH`
    /// Default: `<data dir>/messenger.db`
    pub db_path: PathBuf,

    /// Root directory of the blob store.
    /// Env: `MESSENGER_BLOB_PATH`
    /// Default: `<data dir>/blobs`
    pub blob_path: PathBuf,

    /// Public base URL under which blobs are served. Without one, download
    /// URLs point at the local files.
    /// Env: `MESSENGER_BLOB_BASE_URL`
    pub blob_base_url: Option<Url>,

    /// Env: `MESSENGER_FANOUT` (`atomic` or `rmw`)
    /// Default: `atomic`
    pub fan_out: FanOut,

    /// Env: `MESSENGER_MAX_BLOB_SIZE`
    /// Default: 50 MiB
    pub max_blob_size: usize,
}

impl CliConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            db_path: data_dir.join("messenger.db"),
            blob_path: data_dir.join("blobs"),
            blob_base_url: None,
            fan_out: FanOut::default(),
            max_blob_size: 50 * 1024 * 1024, // 50 MiB
            data_dir,
        }
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Default paths are rooted at `data_dir` when one is given, the platform
    /// data directory otherwise. `MESSENGER_DB_PATH` and `MESSENGER_BLOB_PATH`
    /// win over either.
    pub fn from_env(data_dir: Option<PathBuf>) -> Self {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => match messenger_store::default_data_dir() {
                Ok(dir) => dir,
                Err(e) => {
                    tracing::warn!(error = %e, "No platform data directory, using ./messenger-data");
                    PathBuf::from("./messenger-data")
                }
            },
        };
        Self::from_vars(data_dir, |key| std::env::var(key).ok())
    }

    fn from_vars(data_dir: PathBuf, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::with_data_dir(data_dir);

        if let Some(path) = var("MESSENGER_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(path) = var("MESSENGER_BLOB_PATH") {
            config.blob_path = PathBuf::from(path);
        }

        if let Some(raw) = var("MESSENGER_BLOB_BASE_URL") {
            match Url::parse(&raw) {
                Ok(url) => config.blob_base_url = Some(url),
                Err(e) => tracing::warn!(
                    value = %raw,
                    error = %e,
                    "Invalid MESSENGER_BLOB_BASE_URL, serving local file URLs"
                ),
            }
        }

        if let Some(raw) = var("MESSENGER_FANOUT") {
            match raw.parse::<FanOut>() {
                Ok(mode) => config.fan_out = mode,
                Err(e) => tracing::warn!(error = %e, "Invalid MESSENGER_FANOUT, using default"),
            }
        }

        if let Some(raw) = var("MESSENGER_MAX_BLOB_SIZE") {
            if let Ok(n) = raw.parse::<usize>() {
                config.max_blob_size = n;
            } else {
                tracing::warn!(value = %raw, "Invalid MESSENGER_MAX_BLOB_SIZE, using default");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}
