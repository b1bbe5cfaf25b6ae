use crate::capture::recorder::{ChunkRecorder, ExportTarget, RecordingArtifact};
use crate::capture::source::{MediaFrame, MediaHandle, MediaRelease, TrackSet};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const LIVE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Recording,
    Stopped,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub alert_id: String,
    pub connection_state: ConnectionState,
    pub audio_active: bool,
    pub video_active: bool,
    pub recording_state: RecordingState,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

enum PumpCommand {
    StartRecording {
        target: ExportTarget,
        alert_id: String,
        session_id: Uuid,
        reply: oneshot::Sender<Result<()>>,
    },
    StopRecording {
        reply: oneshot::Sender<Option<ChunkRecorder>>,
    },
}

/// Background task that owns the device connection
struct Pump {
    commands: mpsc::Sender<PumpCommand>,
    task: JoinHandle<()>,
}

/// Live audio/video pull from one reporting device plus its local recording.
///
/// Sessions are single use: once torn down they are discarded.
pub struct EvidenceCaptureSession {
    id: Uuid,
    alert_id: String,
    connection_state: ConnectionState,
    tracks: TrackSet,
    recording_state: RecordingState,
    failure: Option<Error>,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    negotiation: Option<JoinHandle<()>>,
    pump: Option<Pump>,
    live: broadcast::Sender<MediaFrame>,
}

impl EvidenceCaptureSession {
    pub fn new(alert_id: &str) -> Self {
        let (live, _) = broadcast::channel(LIVE_FEED_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            alert_id: alert_id.to_string(),
            connection_state: ConnectionState::Disconnected,
            tracks: TrackSet::default(),
            recording_state: RecordingState::Idle,
            failure: None,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            negotiation: None,
            pump: None,
            live,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn alert_id(&self) -> &str {
        &self.alert_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording_state
    }

    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Connecting or Connected sessions hold the single capture slot
    pub fn is_live(&self) -> bool {
        matches!(
            self.connection_state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            alert_id: self.alert_id.clone(),
            connection_state: self.connection_state,
            audio_active: self.tracks.audio,
            video_active: self.tracks.video,
            recording_state: self.recording_state,
            failure: self.failure.as_ref().map(|e| e.to_string()),
            created_at: self.created_at,
        }
    }

    /// Operator view of the incoming media, only while connected
    pub fn live_feed(&self) -> Option<broadcast::Receiver<MediaFrame>> {
        (self.connection_state == ConnectionState::Connected).then(|| self.live.subscribe())
    }

    pub(crate) fn mark_connecting(&mut self, negotiation: JoinHandle<()>) {
        debug!("Session {} for alert {} connecting", self.id, self.alert_id);
        self.connection_state = ConnectionState::Connecting;
        self.negotiation = Some(negotiation);
    }

    /// Take ownership of the negotiated device connection
    pub(crate) fn mark_connected(&mut self, handle: MediaHandle, chunk_span: Duration) {
        let (tracks, frames, release) = handle.into_parts();
        let (commands, command_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_pump(
            frames,
            release,
            command_rx,
            self.live.clone(),
            chunk_span,
        ));

        self.tracks = tracks;
        self.pump = Some(Pump { commands, task });
        self.connection_state = ConnectionState::Connected;

        info!(
            "Session {} for alert {} connected (audio: {}, video: {})",
            self.id, self.alert_id, tracks.audio, tracks.video
        );
    }

    pub(crate) fn mark_failed(&mut self, error: Error) {
        warn!(
            "Session {} for alert {} failed: {}",
            self.id, self.alert_id, error
        );
        self.connection_state = ConnectionState::Failed;
        self.failure = Some(error);
    }

    /// Open a recording file under `target` and start appending slices to it
    pub async fn start_recording(&mut self, target: &ExportTarget) -> Result<()> {
        if self.connection_state != ConnectionState::Connected {
            return Err(Error::NotConnected(format!(
                "session for alert {} is {:?}",
                self.alert_id, self.connection_state
            )));
        }
        if self.recording_state == RecordingState::Recording {
            return Ok(());
        }

        let (reply, done) = oneshot::channel();
        self.send(PumpCommand::StartRecording {
            target: target.clone(),
            alert_id: self.alert_id.clone(),
            session_id: self.id,
            reply,
        })
        .await?;
        done.await
            .map_err(|_| Error::Internal("media pump stopped".to_string()))??;

        self.recording_state = RecordingState::Recording;
        info!("Recording started for alert {}", self.alert_id);
        Ok(())
    }

    /// Drain in-flight media and finalise the recording file as one artifact
    pub async fn stop_recording(&mut self) -> Result<RecordingArtifact> {
        if self.recording_state != RecordingState::Recording {
            return Err(Error::NotRecording(format!(
                "session for alert {} is not recording",
                self.alert_id
            )));
        }

        let (reply, done) = oneshot::channel();
        self.send(PumpCommand::StopRecording { reply }).await?;
        let recorder = done
            .await
            .map_err(|_| Error::Internal("media pump stopped".to_string()))?;
        self.recording_state = RecordingState::Stopped;

        let recorder = recorder.ok_or_else(|| {
            Error::Internal(format!("no recording file for alert {}", self.alert_id))
        })?;
        recorder.finish().await
    }

    /// Release everything the session holds.
    ///
    /// Stops an active recording first; its artifact, if any, is returned.
    /// Device handles are released on every path, including export failure.
    pub async fn teardown(mut self) -> Result<Option<RecordingArtifact>> {
        self.cancel.cancel();

        let exported = if self.recording_state == RecordingState::Recording {
            Some(self.stop_recording().await)
        } else {
            None
        };

        if let Some(pump) = self.pump.take() {
            drop(pump.commands);
            if let Err(e) = pump.task.await {
                warn!("Media pump for alert {} ended abnormally: {}", self.alert_id, e);
            }
        }
        if let Some(negotiation) = self.negotiation.take() {
            if let Err(e) = negotiation.await {
                if !e.is_cancelled() {
                    warn!("Negotiation for alert {} ended abnormally: {}", self.alert_id, e);
                }
            }
        }

        self.connection_state = ConnectionState::Disconnected;
        info!("Session {} for alert {} discarded", self.id, self.alert_id);

        exported.transpose()
    }

    async fn send(&self, command: PumpCommand) -> Result<()> {
        let pump = self
            .pump
            .as_ref()
            .ok_or_else(|| Error::NotConnected(format!("alert {}", self.alert_id)))?;
        pump.commands
            .send(command)
            .await
            .map_err(|_| Error::Internal("media pump stopped".to_string()))
    }
}

impl Drop for EvidenceCaptureSession {
    fn drop(&mut self) {
        // Abort a negotiation still in flight; the pump stops with its command channel
        self.cancel.cancel();
    }
}

async fn run_pump(
    mut frames: mpsc::Receiver<MediaFrame>,
    release: MediaRelease,
    mut commands: mpsc::Receiver<PumpCommand>,
    live: broadcast::Sender<MediaFrame>,
    chunk_span: Duration,
) {
    let mut recorder: Option<ChunkRecorder> = None;
    let mut frames_open = true;
    let mut slicer = tokio::time::interval(chunk_span);
    slicer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PumpCommand::StartRecording { target, alert_id, session_id, reply }) => {
                    let opened = match ChunkRecorder::create(&target, &alert_id, session_id).await {
                        Ok(rec) => {
                            recorder = Some(rec);
                            slicer.reset();
                            Ok(())
                        }
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(opened);
                }
                Some(PumpCommand::StopRecording { reply }) => {
                    let mut finished = recorder.take();
                    if let Some(rec) = finished.as_mut() {
                        // Frames already queued belong to this recording
                        while let Ok(frame) = frames.try_recv() {
                            forward(&live, &frame);
                            rec.push(&frame);
                        }
                    }
                    let _ = reply.send(finished);
                }
                None => break,
            },
            frame = frames.recv(), if frames_open => match frame {
                Some(frame) => {
                    forward(&live, &frame);
                    if let Some(rec) = recorder.as_mut() {
                        rec.push(&frame);
                    }
                }
                None => {
                    debug!("Device closed its media stream");
                    frames_open = false;
                }
            },
            _ = slicer.tick(), if recorder.is_some() => {
                if let Some(rec) = recorder.as_mut() {
                    if let Err(e) = rec.cut().await {
                        error!("Failed to append recording slice: {}", e);
                    }
                }
            }
        }
    }

    drop(frames);
    release.release();
}

fn forward(live: &broadcast::Sender<MediaFrame>, frame: &MediaFrame) {
    if live.receiver_count() > 0 {
        let _ = live.send(frame.clone());
    }
}
