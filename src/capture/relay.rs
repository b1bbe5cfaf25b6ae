use crate::capture::source::{MediaFrame, MediaHandle, MediaSource, TrackSet};
use crate::error::{Error, Result};
use crate::messaging::AlertEvents;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the ingest socket needs once a device is accepted
#[derive(Debug)]
pub struct DeviceAttachment {
    pub frames: mpsc::Sender<MediaFrame>,
    /// Cancelled when the capture side lets go of the device
    pub hangup: CancellationToken,
}

struct DeviceLink {
    tracks: TrackSet,
    frames: mpsc::Receiver<MediaFrame>,
    hangup: CancellationToken,
}

struct PendingDevice {
    ticket: Uuid,
    reply: oneshot::Sender<Result<DeviceLink>>,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingDevice>>>;

/// Media source fed by devices dialling back over the ingest socket.
///
/// `open` publishes a stream request and waits for the device named by the
/// alert to attach at its ingest URL.
#[derive(Clone)]
pub struct DeviceRelay {
    pending: PendingTable,
    events: AlertEvents,
    public_url: String,
    frame_buffer: usize,
}

impl DeviceRelay {
    pub fn new(events: AlertEvents, public_url: &str, frame_buffer: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
            public_url: public_url.trim_end_matches('/').to_string(),
            frame_buffer: frame_buffer.max(1),
        }
    }

    pub fn ingest_url(&self, alert_id: &str) -> String {
        format!("{}/ws/devices/{}", self.public_url, alert_id)
    }

    pub fn is_pending(&self, alert_id: &str) -> bool {
        self.pending
            .lock()
            .map(|table| table.contains_key(alert_id))
            .unwrap_or(false)
    }

    /// Hand a device's offer to the waiting capture session
    pub fn attach(&self, alert_id: &str, tracks: TrackSet) -> Result<DeviceAttachment> {
        let waiting = self.take_pending(alert_id)?;

        let (frames_tx, frames_rx) = mpsc::channel(self.frame_buffer);
        let hangup = CancellationToken::new();
        let link = DeviceLink {
            tracks,
            frames: frames_rx,
            hangup: hangup.clone(),
        };

        waiting.reply.send(Ok(link)).map_err(|_| {
            Error::NotFound(format!("capture for alert {} is no longer waiting", alert_id))
        })?;

        info!(
            "Device attached for alert {} (audio: {}, video: {})",
            alert_id, tracks.audio, tracks.video
        );
        Ok(DeviceAttachment {
            frames: frames_tx,
            hangup,
        })
    }

    /// The device declined the stream, e.g. permission denied
    pub fn reject(&self, alert_id: &str, reason: &str) -> Result<()> {
        let waiting = self.take_pending(alert_id)?;
        warn!("Device for alert {} rejected the stream: {}", alert_id, reason);
        let _ = waiting
            .reply
            .send(Err(Error::DeviceUnavailable(reason.to_string())));
        Ok(())
    }

    fn take_pending(&self, alert_id: &str) -> Result<PendingDevice> {
        let mut table = self
            .pending
            .lock()
            .map_err(|_| Error::Internal("device relay lock poisoned".to_string()))?;
        table
            .remove(alert_id)
            .ok_or_else(|| Error::NotFound(format!("no capture waiting for alert {}", alert_id)))
    }
}

/// Clears a pending entry if `open` is dropped before a device attaches
struct PendingGuard {
    pending: PendingTable,
    alert_id: String,
    ticket: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut table) = self.pending.lock() {
            if table
                .get(&self.alert_id)
                .map_or(false, |p| p.ticket == self.ticket)
            {
                table.remove(&self.alert_id);
                debug!("Stopped waiting for device of alert {}", self.alert_id);
            }
        }
    }
}

#[async_trait]
impl MediaSource for DeviceRelay {
    async fn open(&self, alert_id: &str) -> Result<MediaHandle> {
        let (reply, answer) = oneshot::channel();
        let ticket = Uuid::new_v4();
        {
            let mut table = self
                .pending
                .lock()
                .map_err(|_| Error::Internal("device relay lock poisoned".to_string()))?;
            table.insert(alert_id.to_string(), PendingDevice { ticket, reply });
        }
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            alert_id: alert_id.to_string(),
            ticket,
        };

        self.events
            .stream_requested(alert_id, &self.ingest_url(alert_id))
            .await;

        let link = answer.await.map_err(|_| {
            Error::DeviceUnavailable(format!("request for alert {} was superseded", alert_id))
        })??;

        let hangup = link.hangup;
        Ok(MediaHandle::new(link.tracks, link.frames, move || {
            hangup.cancel()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::test_support::RecordingPublisher;
    use crate::messaging::EventType;
    use std::time::Duration;

    fn relay() -> (DeviceRelay, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let events = AlertEvents::new(publisher.clone());
        (DeviceRelay::new(events, "http://ops.local/", 8), publisher)
    }

    async fn wait_pending(relay: &DeviceRelay, alert_id: &str) {
        for _ in 0..100 {
            if relay.is_pending(alert_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("alert {} never became pending", alert_id);
    }

    #[test]
    fn test_ingest_url() {
        let (relay, _) = relay();
        assert_eq!(relay.ingest_url("A1"), "http://ops.local/ws/devices/A1");
    }

    #[test]
    fn test_attach_without_request() {
        let (relay, _) = relay();
        let tracks = TrackSet {
            audio: true,
            video: true,
        };
        assert!(matches!(relay.attach("A1", tracks), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_waits_for_device() -> Result<()> {
        let (relay, publisher) = relay();
        let opener = relay.clone();
        let open = tokio::spawn(async move { opener.open("A1").await });

        wait_pending(&relay, "A1").await;
        let requested = publisher.of_type(&EventType::StreamRequested);
        assert_eq!(requested.len(), 1);
        assert_eq!(
            requested[0].payload["ingest_url"],
            "http://ops.local/ws/devices/A1"
        );

        let attachment = relay.attach(
            "A1",
            TrackSet {
                audio: false,
                video: true,
            },
        )?;
        let handle = open.await.unwrap()?;
        assert!(handle.tracks().video);
        assert!(!handle.tracks().audio);

        attachment.frames.send(MediaFrame::new(vec![7u8])).await.unwrap();
        assert!(!attachment.hangup.is_cancelled());
        handle.release();
        assert!(attachment.hangup.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_fails_open() {
        let (relay, _) = relay();
        let opener = relay.clone();
        let open = tokio::spawn(async move { opener.open("A1").await });

        wait_pending(&relay, "A1").await;
        relay.reject("A1", "camera permission denied").unwrap();

        let result = open.await.unwrap();
        assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
        assert!(!relay.is_pending("A1"));
    }

    #[tokio::test]
    async fn test_dropped_open_clears_pending() {
        let (relay, _) = relay();
        let opener = relay.clone();
        let open = tokio::spawn(async move { opener.open("A1").await });

        wait_pending(&relay, "A1").await;
        open.abort();
        let _ = open.await;

        assert!(!relay.is_pending("A1"));
    }
}
