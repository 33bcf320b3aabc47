//! Durable, corruption-resistant persistence of resume snapshots.
//!
//! One JSON file per workflow id under the resume directory. Writes follow
//! a backup/tmp/rename protocol so the live file is never left half
//! written; payloads over a size threshold are gzip-compressed and sniffed
//! back by magic bytes on read. `.tmp` and `.backup` siblings may exist
//! transiently and are never authoritative.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use workflow_runner_sdk::log_warning;

use crate::resume::snapshot::{ResumeSnapshot, SnapshotSummary, WorkflowMetadata};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but does not decode as a snapshot. Callers must
    /// surface this — never treat it as "resume from scratch".
    #[error("snapshot file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// Serialized snapshots larger than this are gzip-compressed.
    pub compress_threshold: usize,
    /// Snapshots idle longer than this are eligible for cleanup.
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|home| home.join(".workflow-runner").join("resume"))
            .unwrap_or_else(|| PathBuf::from(".workflow-runner-resume"));
        Self {
            dir,
            compress_threshold: 256 * 1024,
            retention: Duration::days(7),
        }
    }
}

pub struct ResumeStateStore {
    config: StoreConfig,
}

impl ResumeStateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(StoreConfig {
            dir: dir.into(),
            ..StoreConfig::default()
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn live_path(&self, workflow_id: &str) -> PathBuf {
        self.config.dir.join(format!("{}.json", sanitize(workflow_id)))
    }

    /// Persist `snapshot` as the current state for its workflow id.
    ///
    /// Write protocol: back up the prior file, write the new content to a
    /// `.tmp` sibling, rename it over the live file, then delete the
    /// backup. Any failure in between restores the backup and removes the
    /// temp file before the error propagates.
    pub fn save(&self, snapshot: &ResumeSnapshot) -> Result<(), StoreError> {
        fs::create_dir_all(&self.config.dir)?;

        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let bytes = if json.len() > self.config.compress_threshold {
            gzip(&json)?
        } else {
            json
        };

        let live = self.live_path(&snapshot.workflow_metadata.workflow_id);
        let tmp = sibling(&live, "tmp");
        let backup = sibling(&live, "backup");

        let had_prior = live.exists();
        if had_prior {
            fs::copy(&live, &backup)?;
        }

        let write_result: std::io::Result<()> = (|| {
            fs::write(&tmp, &bytes)?;
            fs::rename(&tmp, &live)?;
            Ok(())
        })();

        match write_result {
            Ok(()) => {
                if had_prior {
                    let _ = fs::remove_file(&backup);
                }
                Ok(())
            }
            Err(err) => {
                if had_prior {
                    let _ = fs::rename(&backup, &live);
                }
                let _ = fs::remove_file(&tmp);
                Err(err.into())
            }
        }
    }

    /// Load the stored snapshot, `Ok(None)` when none exists.
    pub fn load(&self, workflow_id: &str) -> Result<Option<ResumeSnapshot>, StoreError> {
        let live = self.live_path(workflow_id);
        if !live.exists() {
            return Ok(None);
        }
        let bytes = read_maybe_gzipped(&live)?;
        let snapshot =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path: live,
                message: e.to_string(),
            })?;
        Ok(Some(snapshot))
    }

    /// Enumerate stored snapshots, newest activity first. Corrupt entries
    /// are skipped; `load` is where corruption is surfaced.
    pub fn list(&self) -> Result<Vec<SnapshotSummary>, StoreError> {
        let mut summaries = Vec::new();
        if !self.config.dir.exists() {
            return Ok(summaries);
        }
        for entry in fs::read_dir(&self.config.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_summary(&path) {
                Some(summary) => summaries.push(summary),
                None => {
                    log_warning!("skipping unreadable snapshot {}", path.display());
                }
            }
        }
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(summaries)
    }

    /// Delete snapshots idle longer than `retention`, plus any stray
    /// `.tmp`/`.backup` files. Returns the number of snapshots removed.
    pub fn cleanup(&self, retention: Duration) -> Result<usize, StoreError> {
        let mut removed = 0;
        if !self.config.dir.exists() {
            return Ok(removed);
        }
        let cutoff = Utc::now() - retention;
        for entry in fs::read_dir(&self.config.dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("tmp") | Some("backup") => {
                    let _ = fs::remove_file(&path);
                }
                Some("json") => {
                    let expired = match self.read_summary(&path) {
                        Some(summary) => summary.last_activity < cutoff,
                        // Unreadable entry: fall back to filesystem mtime.
                        None => file_mtime_before(&path, &cutoff),
                    };
                    if expired {
                        fs::remove_file(&path)?;
                        removed += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(removed)
    }

    // Metadata-only parse for listings.
    fn read_summary(&self, path: &Path) -> Option<SnapshotSummary> {
        #[derive(serde::Deserialize)]
        struct SummaryDoc {
            workflow_metadata: WorkflowMetadata,
            #[serde(default)]
            completed_tools: Vec<serde_json::Value>,
        }

        let bytes = read_maybe_gzipped(path).ok()?;
        let doc: SummaryDoc = serde_json::from_slice(&bytes).ok()?;
        Some(SnapshotSummary {
            workflow_id: doc.workflow_metadata.workflow_id,
            last_activity: doc.workflow_metadata.last_activity,
            current_phase: doc.workflow_metadata.current_phase,
            completed_tool_count: doc.completed_tools.len(),
        })
    }
}

fn sibling(live: &Path, suffix: &str) -> PathBuf {
    let mut name = live.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    live.with_file_name(name)
}

fn sanitize(workflow_id: &str) -> String {
    workflow_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn read_maybe_gzipped(path: &Path) -> Result<Vec<u8>, StoreError> {
    let raw = fs::read(path)?;
    if raw.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                message: format!("gzip decode failed: {}", e),
            })?;
        Ok(decoded)
    } else {
        Ok(raw)
    }
}

fn file_mtime_before(path: &Path, cutoff: &chrono::DateTime<Utc>) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| chrono::DateTime::<Utc>::from(mtime) < *cutoff)
        .unwrap_or(false)
}
