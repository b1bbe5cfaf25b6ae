use crate::capture::recorder::{ExportTarget, RecordingArtifact};
use crate::capture::session::{EvidenceCaptureSession, SessionSnapshot};
use crate::capture::source::{MediaFrame, MediaHandle, MediaSource, TrackSet};
use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use crate::messaging::AlertEvents;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Result of tearing a session down
#[derive(Debug, Clone)]
pub struct StreamTeardown {
    pub session_id: Uuid,
    pub artifact: Option<RecordingArtifact>,
}

type Slot = Arc<Mutex<Option<EvidenceCaptureSession>>>;

/// Owns the single evidence capture slot.
///
/// At most one session is Connecting or Connected at a time; a Failed
/// session stays visible until it is stopped or replaced.
pub struct CaptureDesk {
    source: Arc<dyn MediaSource>,
    config: CaptureConfig,
    events: AlertEvents,
    slot: Slot,
    artifacts: Arc<std::sync::Mutex<Vec<RecordingArtifact>>>,
}

impl CaptureDesk {
    pub fn new(source: Arc<dyn MediaSource>, config: CaptureConfig, events: AlertEvents) -> Self {
        Self {
            source,
            config,
            events,
            slot: Arc::new(Mutex::new(None)),
            artifacts: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Begin pulling media from the device that raised `alert_id`.
    ///
    /// Returns once the session is Connecting; negotiation continues in the
    /// background and ends Connected, Failed, or cancelled by `stop_stream`.
    pub async fn start_stream(&self, alert_id: &str) -> Result<SessionSnapshot> {
        self.start_stream_if(alert_id, || Ok(())).await
    }

    /// `start_stream` gated on `admit`, which runs while the slot is held,
    /// so the check and the new session are atomic with respect to `stop_stream`.
    pub async fn start_stream_if<F>(&self, alert_id: &str, admit: F) -> Result<SessionSnapshot>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut slot = self.slot.lock().await;
        admit()?;

        if let Some(current) = slot.as_ref() {
            if current.is_live() {
                return Err(Error::SessionBusy(format!(
                    "alert {} already holds the capture session",
                    current.alert_id()
                )));
            }
        }
        let stale = slot.take();

        let mut session = EvidenceCaptureSession::new(alert_id);
        let negotiation = tokio::spawn(negotiate(
            self.slot.clone(),
            self.source.clone(),
            self.config.clone(),
            self.events.clone(),
            alert_id.to_string(),
            session.id(),
            session.cancellation(),
        ));
        session.mark_connecting(negotiation);
        let snapshot = session.snapshot();
        *slot = Some(session);
        drop(slot);

        if let Some(stale) = stale {
            let stale_id = stale.id();
            if let Err(e) = stale.teardown().await {
                warn!("Teardown of replaced session {} failed: {}", stale_id, e);
            }
        }

        info!(
            "Capture session {} for alert {} connecting",
            snapshot.session_id, alert_id
        );
        Ok(snapshot)
    }

    pub async fn start_recording(&self) -> Result<SessionSnapshot> {
        let mut slot = self.slot.lock().await;
        let session = slot
            .as_mut()
            .ok_or_else(|| Error::NotConnected("no capture session".to_string()))?;

        session.start_recording(&export_target(&self.config)).await?;
        let snapshot = session.snapshot();
        drop(slot);

        self.events
            .recording_started(&snapshot.alert_id, snapshot.session_id)
            .await;
        Ok(snapshot)
    }

    pub async fn stop_recording(&self) -> Result<RecordingArtifact> {
        let mut slot = self.slot.lock().await;
        let session = slot
            .as_mut()
            .ok_or_else(|| Error::NotRecording("no capture session".to_string()))?;

        let artifact = session.stop_recording().await?;
        drop(slot);

        self.keep_artifact(&artifact).await;
        Ok(artifact)
    }

    /// Tear down the session for `alert_id`; a no-op when there is none
    pub async fn stop_stream(&self, alert_id: &str) -> Result<Option<StreamTeardown>> {
        let session = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(current) if current.alert_id() == alert_id => slot.take(),
                _ => None,
            }
        };

        match session {
            Some(session) => self.teardown(session).await.map(Some),
            None => Ok(None),
        }
    }

    /// Tear down whatever session exists
    pub async fn stop_any(&self) -> Result<Option<StreamTeardown>> {
        let session = self.slot.lock().await.take();
        match session {
            Some(session) => self.teardown(session).await.map(Some),
            None => Ok(None),
        }
    }

    async fn teardown(&self, session: EvidenceCaptureSession) -> Result<StreamTeardown> {
        let session_id = session.id();
        let alert_id = session.alert_id().to_string();

        let artifact = session.teardown().await?;
        if let Some(artifact) = &artifact {
            self.keep_artifact(artifact).await;
        }
        self.events.stream_stopped(&alert_id, session_id).await;

        Ok(StreamTeardown {
            session_id,
            artifact,
        })
    }

    async fn keep_artifact(&self, artifact: &RecordingArtifact) {
        remember(&self.artifacts, artifact);
        self.events.recording_completed(artifact).await;
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        self.slot.lock().await.as_ref().map(|s| s.snapshot())
    }

    pub async fn session_for(&self, alert_id: &str) -> Option<SessionSnapshot> {
        self.slot
            .lock()
            .await
            .as_ref()
            .filter(|s| s.alert_id() == alert_id)
            .map(|s| s.snapshot())
    }

    pub async fn live_feed(&self) -> Option<broadcast::Receiver<MediaFrame>> {
        self.slot.lock().await.as_ref().and_then(|s| s.live_feed())
    }

    /// Exported recordings, oldest first
    pub fn artifacts(&self) -> Vec<RecordingArtifact> {
        self.artifacts
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}

fn export_target(config: &CaptureConfig) -> ExportTarget {
    ExportTarget {
        directory: config.storage_path.clone(),
        container: config.container.clone(),
    }
}

fn remember(artifacts: &std::sync::Mutex<Vec<RecordingArtifact>>, artifact: &RecordingArtifact) {
    match artifacts.lock() {
        Ok(mut list) => list.push(artifact.clone()),
        Err(_) => error!("Artifact history lock poisoned, {:?} not listed", artifact.path),
    }
}

async fn negotiate(
    slot: Slot,
    source: Arc<dyn MediaSource>,
    config: CaptureConfig,
    events: AlertEvents,
    alert_id: String,
    session_id: Uuid,
    cancel: tokio_util::sync::CancellationToken,
) {
    let timeout = config.negotiation_timeout();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Negotiation for alert {} cancelled", alert_id);
            return;
        }
        result = tokio::time::timeout(timeout, source.open(&alert_id)) => match result {
            Ok(Ok(handle)) => check_tracks(handle, &alert_id),
            Ok(Err(Error::DeviceUnavailable(reason))) => Err(Error::DeviceUnavailable(reason)),
            Ok(Err(e)) => Err(Error::DeviceUnavailable(e.to_string())),
            Err(_) => Err(Error::Timeout(format!(
                "device for alert {} did not negotiate within {:?}",
                alert_id, timeout
            ))),
        },
    };

    let mut guard = slot.lock().await;
    let session = match guard.as_mut() {
        Some(session) if session.id() == session_id && !cancel.is_cancelled() => session,
        // Stopped while we waited; dropping the handle releases the device
        _ => {
            info!("Discarding negotiation result for stopped session {}", session_id);
            return;
        }
    };

    let settled = match outcome {
        Ok(handle) => {
            let tracks = handle.tracks();
            session.mark_connected(handle, config.chunk_span());

            let recording = config.auto_record
                && match session.start_recording(&export_target(&config)).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Could not start recording for alert {}: {}", alert_id, e);
                        false
                    }
                };
            Settled::Connected { tracks, recording }
        }
        Err(e) => {
            let reason = e.to_string();
            session.mark_failed(e);
            Settled::Failed { reason }
        }
    };
    drop(guard);

    // Teardown joins this task, so the broker is reached from a detached one
    tokio::spawn(async move {
        match settled {
            Settled::Connected { tracks, recording } => {
                events
                    .stream_connected(&alert_id, session_id, tracks.audio, tracks.video)
                    .await;
                if recording {
                    events.recording_started(&alert_id, session_id).await;
                }
            }
            Settled::Failed { reason } => {
                events.stream_failed(&alert_id, session_id, &reason).await;
            }
        }
    });
}

/// How a negotiation ended, for publishing once the slot is released
enum Settled {
    Connected { tracks: TrackSet, recording: bool },
    Failed { reason: String },
}

fn check_tracks(handle: MediaHandle, alert_id: &str) -> Result<MediaHandle> {
    let tracks = handle.tracks();
    if !tracks.video {
        handle.release();
        return Err(Error::DeviceUnavailable(format!(
            "device for alert {} offered no video track",
            alert_id
        )));
    }
    Ok(handle)
}
