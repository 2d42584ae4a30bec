//! Configuration for the sermon pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SERMONFLOW_HOME)
//! 2. Config file ($SERMONFLOW_HOME/config.yaml or ~/.sermonflow/config.yaml)
//! 3. Defaults
//!
//! Chunk duration and the segment byte ceiling are configuration, not
//! invariants baked into the code: they track whichever transcription
//! provider is in use. Resolved config is constructed once and passed to
//! components explicitly; there is no global.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Raw config file schema (matches YAML structure).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub chunking: Option<ChunkingConfig>,
    #[serde(default)]
    pub jobs: Option<JobsConfig>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
    #[serde(default)]
    pub services: Option<ServicesConfig>,
}

/// Segmenting thresholds for capture and import splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum segment duration in seconds before a new segment begins.
    #[serde(default = "default_chunk_secs")]
    pub max_segment_secs: u32,

    /// Maximum segment size in bytes (transcription-service upload limit).
    #[serde(default = "default_segment_bytes")]
    pub max_segment_bytes: u64,

    /// PCM sample rate used for duration accounting.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_chunk_secs() -> u32 {
    600 // 10 minutes
}
fn default_segment_bytes() -> u64 {
    25 * 1024 * 1024 // 25MB
}
fn default_sample_rate() -> u32 {
    16_000
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_segment_secs: default_chunk_secs(),
            max_segment_bytes: default_segment_bytes(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// Job queue behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum recordings processed concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Attempts per external call before the job fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds (doubled per attempt).
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,

    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_call_timeout() -> u64 {
    120
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_ms(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl JobsConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Backoff delay for a given (1-based) attempt number.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.backoff_base_ms * factor)
    }
}

/// Sync engine behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Ceiling for the local playback cache in bytes; least-recently-used
    /// audio is evicted once exceeded.
    #[serde(default = "default_cache_ceiling")]
    pub cache_ceiling_bytes: u64,
}

fn default_cache_ceiling() -> u64 {
    512 * 1024 * 1024 // 512MB
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ceiling_bytes: default_cache_ceiling(),
        }
    }
}

/// Endpoints and model identifiers for external services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub transcription_url: Option<String>,
    #[serde(default)]
    pub generative_url: Option<String>,
    #[serde(default)]
    pub moderation_url: Option<String>,
    #[serde(default)]
    pub storage_url: Option<String>,
    #[serde(default)]
    pub sync_url: Option<String>,
    /// Prompt template version stamped onto generated study guides.
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
}

fn default_prompt_version() -> String {
    "v2".to_string()
}

/// Resolved configuration with absolute paths.
#[derive(Debug, Clone)]
pub struct Config {
    /// App home directory (database, audio, cache live under it).
    pub home: PathBuf,
    pub chunking: ChunkingConfig,
    pub jobs: JobsConfig,
    pub sync: SyncConfig,
    pub services: ServicesConfig,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sermonflow");
        Self::with_home(home)
    }
}

impl Config {
    /// Build a config rooted at an explicit home directory, with defaults
    /// for everything else. Tests use this with a temp dir.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            chunking: ChunkingConfig::default(),
            jobs: JobsConfig::default(),
            sync: SyncConfig::default(),
            services: ServicesConfig::default(),
        }
    }

    /// Load configuration from env + config file + defaults.
    pub fn load() -> Result<Self> {
        let home = match std::env::var("SERMONFLOW_HOME") {
            Ok(h) => PathBuf::from(h),
            Err(_) => dirs::home_dir()
                .context("Failed to determine home directory")?
                .join(".sermonflow"),
        };

        let mut config = Self::with_home(home);
        let config_path = config.home.join("config.yaml");
        if config_path.exists() {
            let file = load_config_file(&config_path)?;
            config.apply(file);
        }

        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        if let Some(chunking) = file.chunking {
            self.chunking = chunking;
        }
        if let Some(jobs) = file.jobs {
            self.jobs = jobs;
        }
        if let Some(sync) = file.sync {
            self.sync = sync;
        }
        if let Some(services) = file.services {
            self.services = services;
        }
    }

    /// Path to the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.home.join("sermonflow.db")
    }

    /// Directory for locally captured/imported segment audio.
    pub fn audio_dir(&self) -> PathBuf {
        self.home.join("audio")
    }

    /// Directory for the bounded playback cache.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }
}

/// Load and parse a config file.
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::with_home("/tmp/test");
        assert_eq!(config.chunking.max_segment_secs, 600);
        assert_eq!(config.chunking.max_segment_bytes, 25 * 1024 * 1024);
        assert_eq!(config.jobs.max_concurrent, 2);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/test/sermonflow.db"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
chunking:
  max_segment_secs: 300
  max_segment_bytes: 10485760
jobs:
  max_concurrent: 4
sync:
  cache_ceiling_bytes: 1048576
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        let mut config = Config::with_home(temp.path());
        config.apply(parsed);

        assert_eq!(config.chunking.max_segment_secs, 300);
        assert_eq!(config.chunking.max_segment_bytes, 10 * 1024 * 1024);
        assert_eq!(config.jobs.max_concurrent, 4);
        assert_eq!(config.sync.cache_ceiling_bytes, 1024 * 1024);
        // Untouched section keeps defaults
        assert_eq!(config.chunking.sample_rate, 16_000);
    }

    #[test]
    fn test_backoff_doubles() {
        let jobs = JobsConfig {
            backoff_base_ms: 100,
            ..Default::default()
        };
        assert_eq!(jobs.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(jobs.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(jobs.backoff_delay(3), Duration::from_millis(400));
    }
}
