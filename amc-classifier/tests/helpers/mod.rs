//! Test Helper Utilities
//!
//! Scripted transport, engine wiring on a temporary database, and album
//! fixtures shared by the integration tests.

#![allow(dead_code)]

use amc_classifier::models::{AlbumInput, Item};
use amc_classifier::services::{CompletionRequest, Transport};
use amc_classifier::types::NoTags;
use amc_classifier::{Engine, RemoteError};
use amc_common::config::TomlConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub type Script = dyn Fn(&CompletionRequest, u32) -> Result<String, RemoteError> + Send + Sync;

/// Which prompt a request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Extraction,
    Enrichment,
    Verification,
    Repair,
    Other,
}

pub fn kind_of(request: &CompletionRequest) -> Kind {
    if request.system.starts_with("You repair malformed JSON") {
        Kind::Repair
    } else if request.prompt.contains("Identify this album.") {
        Kind::Extraction
    } else if request.prompt.contains("Is this identification correct?") {
        Kind::Verification
    } else if request.prompt.contains("\"genres\"") {
        Kind::Enrichment
    } else {
        Kind::Other
    }
}

/// Transport answering from a script; counts calls and concurrency
pub struct ScriptedTransport {
    script: Box<Script>,
    latency: Duration,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&CompletionRequest, u32) -> Result<String, RemoteError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Well-behaved remote: valid answers for every prompt
    pub fn answering() -> Self {
        Self::new(|request, _| Ok(answer(request)))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: Kind) -> usize {
        self.requests().iter().filter(|r| kind_of(r) == kind).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError> {
        let call_no = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.script)(request, call_no)
    }
}

/// Valid answer for any pipeline prompt
pub fn answer(request: &CompletionRequest) -> String {
    match kind_of(request) {
        Kind::Extraction => extraction_answer(&request.prompt),
        Kind::Enrichment => {
            r#"{"genres":["Jazz"],"moods":["calm"],"energy_level":2,"is_compilation":false}"#.to_string()
        }
        Kind::Verification => r#"{"confirmed":true}"#.to_string(),
        Kind::Repair => r#"{"artist":"Repaired","album_title":"Answer","year":2001}"#.to_string(),
        Kind::Other => "{}".to_string(),
    }
}

/// Reads "Folder: Artist - Title" out of the prompt
fn extraction_answer(prompt: &str) -> String {
    let folder = prompt
        .lines()
        .find_map(|line| line.strip_prefix("Folder: "))
        .unwrap_or("Unknown - Unknown");
    let (artist, title) = folder.split_once(" - ").unwrap_or((folder, folder));
    serde_json::json!({
        "artist": artist.trim(),
        "album_title": title.trim(),
        "year": 1959,
    })
    .to_string()
}

/// Fast-retry configuration on a database inside `dir`
pub fn test_config(dir: &Path) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.caching.database_path = dir.join("cache.db");
    config.api.max_attempts = 3;
    config.api.base_delay_ms = 1;
    config.api.max_delay_ms = 5;
    config.api.timeout_seconds = 5.0;
    config.concurrency.max_workers = 4;
    config.concurrency.api_concurrency = 2;
    config
}

pub async fn engine(config: &TomlConfig, transport: Arc<ScriptedTransport>) -> Engine {
    Engine::from_config(config, transport, Arc::new(NoTags)).await.unwrap()
}

/// In-memory album with `tracks` flac files
pub fn album(identity: &str, folder_name: &str, tracks: usize) -> Item {
    album_with_fingerprint(identity, folder_name, tracks, "n1-s100-m0")
}

pub fn album_with_fingerprint(identity: &str, folder_name: &str, tracks: usize, fingerprint: &str) -> Item {
    let path = PathBuf::from(identity);
    let files = (1..=tracks)
        .map(|n| path.join(format!("{:02} Track.flac", n)))
        .collect();
    Item::new(
        identity,
        fingerprint,
        AlbumInput {
            path,
            folder_name: folder_name.to_string(),
            parent_dirs: Vec::new(),
            files,
            disc_count: 1,
        },
    )
}

/// Album directory on disk with empty track files
pub fn album_dir(root: &Path, name: &str, files: &[&str]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for file in files {
        std::fs::write(dir.join(file), b"not really audio").unwrap();
    }
    dir
}

pub fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}
