use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kiosk configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance accepted as the same face.
    pub match_threshold: f32,
    /// Still image kept up to date by the external capture tool.
    pub snapshot_path: PathBuf,
    /// Snapshots older than this are treated as not ready (0 disables).
    pub snapshot_max_age_ms: u64,
    /// External face-embedding program.
    pub embedder: PathBuf,
    /// Extra arguments passed to the embedder before the frame geometry.
    pub embedder_args: Vec<String>,
    /// Directory holding the embedder's model files.
    pub model_dir: PathBuf,
    /// Number of camera polls per recognition attempt.
    pub capture_attempts: usize,
    /// Delay between camera polls while the camera is not ready.
    pub frame_interval_ms: u64,
    /// Upper bound on one capture, embedder run included.
    pub capture_timeout_secs: u64,
    /// Number of rows shown on the dashboard.
    pub recent_limit: usize,
    /// Free-form kiosk location stored with each check-in.
    pub location: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("attendance.db"),
            match_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            snapshot_path: data_dir.join("snapshot.jpg"),
            snapshot_max_age_ms: 5_000,
            embedder: PathBuf::from("rollcall-embed"),
            embedder_args: Vec::new(),
            model_dir: data_dir.join("models"),
            capture_attempts: 10,
            frame_interval_ms: 200,
            capture_timeout_secs: 10,
            recent_limit: 50,
            location: String::new(),
        }
    }
}

impl Config {
    /// Load configuration. An explicit `path` must exist; otherwise the
    /// default config file is used only when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !valid_threshold(&self.match_threshold) {
            bail!(
                "match_threshold must be a positive finite number, got {}",
                self.match_threshold
            );
        }
        if self.capture_timeout_secs == 0 {
            bail!("capture_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from `ROLLCALL_*` variables. Unparsable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_SNAPSHOT_PATH") {
            self.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER") {
            self.embedder = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_LOCATION") {
            self.location = v;
        }
        env_parse_if(
            &lookup,
            "ROLLCALL_MATCH_THRESHOLD",
            &mut self.match_threshold,
            valid_threshold,
        );
        env_parse(&lookup, "ROLLCALL_SNAPSHOT_MAX_AGE_MS", &mut self.snapshot_max_age_ms);
        env_parse(&lookup, "ROLLCALL_CAPTURE_ATTEMPTS", &mut self.capture_attempts);
        env_parse(&lookup, "ROLLCALL_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        env_parse_if(
            &lookup,
            "ROLLCALL_CAPTURE_TIMEOUT_SECS",
            &mut self.capture_timeout_secs,
            |&secs| secs > 0,
        );
        env_parse(&lookup, "ROLLCALL_RECENT_LIMIT", &mut self.recent_limit);
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn snapshot_max_age(&self) -> Option<Duration> {
        (self.snapshot_max_age_ms > 0).then(|| Duration::from_millis(self.snapshot_max_age_ms))
    }
}

fn valid_threshold(t: &f32) -> bool {
    t.is_finite() && *t > 0.0
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    env_parse_if(lookup, key, target, |_| true);
}

/// Like [`env_parse`], but values failing `accept` are ignored too.
fn env_parse_if<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
    accept: impl Fn(&T) -> bool,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) if accept(&v) => *target = v,
        Ok(_) => tracing::warn!(key, value = %raw, "ignoring out-of-range setting"),
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable setting"),
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall")
}

fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall/config.toml")
}
