//! Command-line interface.
//!
//! Provides commands for importing audio, driving the processing
//! pipeline, inspecting recordings, syncing and searching transcripts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::audio::import_file;
use crate::config::Config;
use crate::domain::RecordingStatus;
use crate::pipeline::{PipelineDeps, ProcessingJobQueue};
use crate::services::http::{
    HttpGenerative, HttpModeration, HttpObjectStore, HttpRemoteStore, HttpSpeechToText,
};
use crate::store::Store;
use crate::sync::{AudioCache, SyncEngine};

/// sermonflow - sermon audio processing pipeline
#[derive(Parser, Debug)]
#[command(name = "sermonflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import an audio file as a new pending recording
    Import {
        /// Audio file (raw PCM or 16-bit WAV)
        path: PathBuf,

        /// Recording title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Speaker name
        #[arg(short, long)]
        speaker: Option<String>,

        /// Start processing immediately after import
        #[arg(long)]
        process: bool,
    },

    /// Process a recording through the full pipeline
    Process {
        /// Recording ID (UUID)
        recording_id: String,
    },

    /// Resume every recording left mid-pipeline
    Resume,

    /// Show one recording, or all of them
    Status {
        /// Recording ID (all recordings when omitted)
        recording_id: Option<String>,
    },

    /// Retry a failed or degraded recording
    Retry {
        /// Recording ID to retry
        recording_id: String,
    },

    /// Push local changes and pull remote ones
    Sync,

    /// Full-text search across transcripts
    Search {
        /// Search query
        query: String,

        /// Maximum number of hits
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::load()?;

        match self.command {
            Commands::Import {
                path,
                title,
                speaker,
                process,
            } => import(&config, path, title, speaker, process).await,
            Commands::Process { recording_id } => {
                process_recording(&config, &parse_id(&recording_id)?).await
            }
            Commands::Resume => resume(&config).await,
            Commands::Status { recording_id } => show_status(&config, recording_id.as_deref()),
            Commands::Retry { recording_id } => retry(&config, &parse_id(&recording_id)?).await,
            Commands::Sync => sync(&config).await,
            Commands::Search { query, limit } => search(&config, &query, limit),
            Commands::Config => show_config(&config),
        }
    }
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("'{s}' is not a valid recording id"))
}

fn open_store(config: &Config) -> Result<Arc<Store>> {
    std::fs::create_dir_all(&config.home)
        .with_context(|| format!("Failed to create {}", config.home.display()))?;
    Ok(Arc::new(Store::open(&config.db_path())?))
}

fn require_url(url: &Option<String>, name: &str) -> Result<String> {
    url.clone()
        .with_context(|| format!("services.{name} is not configured"))
}

fn api_key() -> Option<String> {
    std::env::var("SERMONFLOW_API_KEY").ok()
}

fn build_queue(config: &Config, store: Arc<Store>) -> Result<ProcessingJobQueue> {
    let key = api_key();
    let deps = PipelineDeps {
        store,
        speech: Arc::new(HttpSpeechToText::new(
            require_url(&config.services.transcription_url, "transcription_url")?,
            key.clone(),
        )),
        generative: Arc::new(HttpGenerative::new(
            require_url(&config.services.generative_url, "generative_url")?,
            key.clone(),
        )),
        moderation: Arc::new(HttpModeration::new(
            require_url(&config.services.moderation_url, "moderation_url")?,
            key.clone(),
        )),
        objects: Arc::new(HttpObjectStore::new(
            require_url(&config.services.storage_url, "storage_url")?,
            key,
        )),
    };
    Ok(ProcessingJobQueue::new(
        deps,
        config.jobs.clone(),
        config.services.prompt_version.clone(),
    ))
}

async fn import(
    config: &Config,
    path: PathBuf,
    title: Option<String>,
    speaker: Option<String>,
    process: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    });

    let (recording, segments) = import_file(&store, config, &path, &title, speaker).await?;
    println!(
        "Imported '{}' as {} ({} segments, {:.1}s)",
        recording.title,
        recording.id,
        segments.len(),
        recording.duration_secs
    );

    if process {
        process_recording(config, &recording.id).await?;
    }
    Ok(())
}

/// Enqueue one recording and follow its progress to a terminal state.
async fn process_recording(config: &Config, recording_id: &Uuid) -> Result<()> {
    let store = open_store(config)?;
    let queue = build_queue(config, store)?;

    let mut progress = queue.subscribe(*recording_id);
    queue.enqueue(*recording_id);

    while let Ok(update) = progress.recv().await {
        println!(
            "  {:>12}  {:>5.1}%{}",
            update.status.as_str(),
            update.fraction * 100.0,
            update
                .error
                .as_deref()
                .map(|e| format!("  {e}"))
                .unwrap_or_default()
        );
        if update.status.is_terminal() {
            break;
        }
    }
    Ok(())
}

async fn resume(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let queue = build_queue(config, store.clone())?;

    // Subscribe before the jobs start so no terminal update is missed.
    let subscriptions: Vec<_> = store
        .resumable_recordings()?
        .into_iter()
        .map(|r| queue.subscribe(r.id))
        .collect();

    let count = queue.resume_incomplete()?;
    println!("Resumed {count} recording(s)");

    for mut progress in subscriptions {
        while let Ok(update) = progress.recv().await {
            if update.status.is_terminal() {
                break;
            }
        }
    }
    Ok(())
}

fn show_status(config: &Config, recording_id: Option<&str>) -> Result<()> {
    let store = open_store(config)?;

    let recordings = match recording_id {
        Some(id) => vec![store.get_recording(parse_id(id)?)?],
        None => store.list_recordings()?,
    };

    if recordings.is_empty() {
        println!("No recordings");
        return Ok(());
    }

    for recording in recordings {
        let segments = store.segments_for(recording.id)?;
        println!(
            "{}  {:<12} guide:{:<11} {:>7.1}s  {} segment(s)  {}",
            recording.id,
            recording.status.as_str(),
            recording.guide_status.as_str(),
            recording.duration_secs,
            segments.len(),
            recording.title,
        );
        if let Some(error) = &recording.last_error {
            println!("    last error: {error}");
        }
        if recording.status == RecordingStatus::Degraded {
            println!("    transcript available; retry regenerates the study guide only");
        }
    }
    Ok(())
}

async fn retry(config: &Config, recording_id: &Uuid) -> Result<()> {
    let store = open_store(config)?;
    let queue = build_queue(config, store)?;

    let mut progress = queue.subscribe(*recording_id);
    queue.retry(*recording_id)?;
    while let Ok(update) = progress.recv().await {
        println!("  {:>12}  {:>5.1}%", update.status.as_str(), update.fraction * 100.0);
        if update.status.is_terminal() {
            break;
        }
    }
    Ok(())
}

async fn sync(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let key = api_key();
    let remote = Arc::new(HttpRemoteStore::new(
        require_url(&config.services.sync_url, "sync_url")?,
        key.clone(),
    ));
    let objects = Arc::new(HttpObjectStore::new(
        require_url(&config.services.storage_url, "storage_url")?,
        key,
    ));
    let cache = AudioCache::open(config.cache_dir(), config.sync.cache_ceiling_bytes)?;

    let engine = SyncEngine::new(store, remote, objects, cache);
    let report = engine.sync().await?;

    println!(
        "Pushed {} recording(s), {} bookmark(s), {} segment(s); pulled {} recording(s), {} bookmark(s)",
        report.pushed_recordings,
        report.pushed_bookmarks,
        report.uploaded_segments,
        report.pulled_recordings,
        report.pulled_bookmarks
    );
    Ok(())
}

fn search(config: &Config, query: &str, limit: u32) -> Result<()> {
    let store = open_store(config)?;
    let hits = store.search_transcripts(query, limit)?;

    if hits.is_empty() {
        println!("No matches");
        return Ok(());
    }

    for hit in hits {
        let title = store
            .get_recording(hit.recording_id)
            .map(|r| r.title)
            .unwrap_or_else(|_| "<unknown>".to_string());
        println!("{}  {}", hit.recording_id, title);
        println!("    {}", hit.snippet);
    }
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("home:                 {}", config.home.display());
    println!("database:             {}", config.db_path().display());
    println!("audio dir:            {}", config.audio_dir().display());
    println!("cache dir:            {}", config.cache_dir().display());
    println!("max segment secs:     {}", config.chunking.max_segment_secs);
    println!("max segment bytes:    {}", config.chunking.max_segment_bytes);
    println!("sample rate:          {}", config.chunking.sample_rate);
    println!("max concurrent jobs:  {}", config.jobs.max_concurrent);
    println!("max attempts:         {}", config.jobs.max_attempts);
    println!("call timeout secs:    {}", config.jobs.call_timeout_secs);
    println!("cache ceiling bytes:  {}", config.sync.cache_ceiling_bytes);
    println!("prompt version:       {}", config.services.prompt_version);
    Ok(())
}
