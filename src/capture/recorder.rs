use crate::capture::source::MediaFrame;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Exported evidence file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingArtifact {
    pub path: PathBuf,
    pub alert_id: String,
    pub session_id: Uuid,
    pub chunk_count: usize,
    pub size_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Where and how artifacts are written
#[derive(Debug, Clone)]
pub struct ExportTarget {
    pub directory: PathBuf,
    pub container: String,
}

/// Time-sliced recording written straight to disk.
///
/// Each `cut` appends the pending slice to a `.part` file beside the final
/// artifact, so at most one slice is held in memory and an interrupted
/// recording leaves its media on disk. `finish` renames the file to its
/// deterministic artifact name.
pub struct ChunkRecorder {
    alert_id: String,
    session_id: Uuid,
    target: ExportTarget,
    part_path: PathBuf,
    file: File,
    started_at: DateTime<Utc>,
    chunk_count: usize,
    size_bytes: u64,
    pending: Vec<u8>,
    pending_frames: usize,
    // First write error; later slices are dropped and `finish` reports it
    failure: Option<Error>,
}

impl ChunkRecorder {
    pub async fn create(target: &ExportTarget, alert_id: &str, session_id: Uuid) -> Result<Self> {
        tokio::fs::create_dir_all(&target.directory).await?;
        let part_path = target.directory.join(format!(
            "panic-alert-{}-{}.part",
            safe_alert_id(alert_id),
            session_id
        ));
        let file = File::create(&part_path).await?;
        debug!("Recording alert {} into {:?}", alert_id, part_path);

        Ok(Self {
            alert_id: alert_id.to_string(),
            session_id,
            target: target.clone(),
            part_path,
            file,
            started_at: Utc::now(),
            chunk_count: 0,
            size_bytes: 0,
            pending: Vec::new(),
            pending_frames: 0,
            failure: None,
        })
    }

    pub fn push(&mut self, frame: &MediaFrame) {
        self.pending.extend_from_slice(&frame.data);
        self.pending_frames += 1;
    }

    /// Close the current slice and append it to the file.
    ///
    /// Only the write that fails returns the error.
    pub async fn cut(&mut self) -> Result<()> {
        if self.pending_frames == 0 {
            return Ok(());
        }
        let slice = std::mem::take(&mut self.pending);
        self.pending_frames = 0;
        if self.failure.is_some() {
            return Ok(());
        }

        let written = match self.file.write_all(&slice).await {
            Ok(()) => self.file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let err = Error::from(e);
            self.failure = Some(err.clone());
            return Err(err);
        }
        self.chunk_count += 1;
        self.size_bytes += slice.len() as u64;
        Ok(())
    }

    /// Write the last slice, sync, and move the file to its artifact name
    pub async fn finish(mut self) -> Result<RecordingArtifact> {
        self.cut().await?;
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        self.file.sync_all().await?;

        let ended_at = Utc::now();
        let path = self.target.directory.join(artifact_file_name(
            &self.alert_id,
            ended_at,
            &self.target.container,
        ));
        tokio::fs::rename(&self.part_path, &path).await?;

        info!(
            "Exported {} chunks ({} bytes) for alert {} to {:?}",
            self.chunk_count, self.size_bytes, self.alert_id, path
        );

        Ok(RecordingArtifact {
            path,
            alert_id: self.alert_id,
            session_id: self.session_id,
            chunk_count: self.chunk_count,
            size_bytes: self.size_bytes,
            started_at: self.started_at,
            ended_at,
        })
    }
}

fn safe_alert_id(alert_id: &str) -> String {
    alert_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `panic-alert-<alert id>-<end time>.<container>`
pub fn artifact_file_name(alert_id: &str, ended_at: DateTime<Utc>, container: &str) -> String {
    format!(
        "panic-alert-{}-{}.{}",
        safe_alert_id(alert_id),
        ended_at.format("%Y%m%dT%H%M%S%3fZ"),
        container.trim_start_matches('.')
    )
}

/// Create the evidence directory up front so a bad path fails at startup
pub fn ensure_writable(directory: &Path) -> Result<()> {
    std::fs::create_dir_all(directory).map_err(|e| {
        Error::Config(format!(
            "Evidence directory {:?} is not writable: {}",
            directory, e
        ))
    })
}
