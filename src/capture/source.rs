use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Tracks the device agreed to send
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackSet {
    pub audio: bool,
    pub video: bool,
}

/// A slice of muxed media as produced by the device's media layer
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Arc<[u8]>,
    pub captured_at: DateTime<Utc>,
}

impl MediaFrame {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Runs the release hook exactly once, on `release()` or drop
pub struct MediaRelease {
    hook: Option<Box<dyn FnOnce() + Send>>,
}

impl MediaRelease {
    pub fn new<F>(hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            hook: Some(Box::new(hook)),
        }
    }

    pub fn release(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

impl Drop for MediaRelease {
    fn drop(&mut self) {
        self.run();
    }
}

/// An acquired connection to a reporting device
pub struct MediaHandle {
    tracks: TrackSet,
    frames: mpsc::Receiver<MediaFrame>,
    release: MediaRelease,
}

impl MediaHandle {
    pub fn new<F>(tracks: TrackSet, frames: mpsc::Receiver<MediaFrame>, on_release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            tracks,
            frames,
            release: MediaRelease::new(on_release),
        }
    }

    pub fn tracks(&self) -> TrackSet {
        self.tracks
    }

    pub fn release(self) {
        self.release.release();
    }

    pub(crate) fn into_parts(self) -> (TrackSet, mpsc::Receiver<MediaFrame>, MediaRelease) {
        (self.tracks, self.frames, self.release)
    }
}

/// Obtains live media from the device that raised an alert.
///
/// `open` may take arbitrarily long and must be cancel safe: dropping the
/// future releases anything acquired so far.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, alert_id: &str) -> Result<MediaHandle>;
}
