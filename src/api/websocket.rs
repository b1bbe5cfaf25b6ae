use crate::api::rest::{ApiError, AppState};
use crate::capture::{DeviceRelay, MediaFrame, TrackSet};
use crate::error::Error;
use crate::urgency::UrgencyPulse;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};

/// First text message a device sends on its ingest socket
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceHello {
    Offer {
        #[serde(default)]
        audio: bool,
        #[serde(default)]
        video: bool,
    },
    Reject {
        reason: String,
    },
}

// Flashing indicator pulses for the console
pub async fn urgency_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let pulses = state.ticker.subscribe();
    ws.on_upgrade(move |socket| send_pulses(socket, pulses))
}

async fn send_pulses(socket: WebSocket, mut pulses: broadcast::Receiver<UrgencyPulse>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            pulse = pulses.recv() => match pulse {
                Ok(pulse) => {
                    let text = match serde_json::to_string(&pulse) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize urgency pulse: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("Urgency socket skipped {} pulses", skipped),
                Err(RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    debug!("Urgency socket closed");
}

// Operator view of the connected device
pub async fn live_view_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    match state.capture.live_feed().await {
        Some(feed) => ws
            .on_upgrade(move |socket| send_live(socket, feed))
            .into_response(),
        None => ApiError::from(Error::NotConnected("no connected capture session".to_string()))
            .into_response(),
    }
}

async fn send_live(socket: WebSocket, mut feed: broadcast::Receiver<MediaFrame>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = feed.recv() => match frame {
                Ok(frame) => {
                    if sender.send(Message::Binary(frame.data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("Live view dropped {} frames", skipped),
                // Session torn down
                Err(RecvError::Closed) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    debug!("Live view socket closed");
}

// Devices dial back here after a stream request
pub async fn device_ingest_ws(
    ws: WebSocketUpgrade,
    Path(alert_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if !state.relay.is_pending(&alert_id) {
        return ApiError::from(Error::NotFound(format!(
            "no capture waiting for alert {}",
            alert_id
        )))
        .into_response();
    }

    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| ingest_device(socket, relay, alert_id))
        .into_response()
}

async fn ingest_device(socket: WebSocket, relay: DeviceRelay, alert_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let hello = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<DeviceHello>(&text),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) => {
                let _ = relay.reject(&alert_id, "device sent media before its offer");
                return;
            }
            Some(Err(_)) | None => {
                let _ = relay.reject(&alert_id, "device disconnected before offering media");
                return;
            }
        }
    };

    let (audio, video) = match hello {
        Ok(DeviceHello::Offer { audio, video }) => (audio, video),
        Ok(DeviceHello::Reject { reason }) => {
            let _ = relay.reject(&alert_id, &reason);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
        Err(e) => {
            warn!("Malformed offer from device of alert {}: {}", alert_id, e);
            let _ = relay.reject(&alert_id, "malformed offer");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let attachment = match relay.attach(&alert_id, TrackSet { audio, video }) {
        Ok(attachment) => attachment,
        Err(e) => {
            warn!("Device for alert {} could not attach: {}", alert_id, e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = attachment.hangup.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if attachment.frames.send(MediaFrame::new(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(ping))) => {
                    if sender.send(Message::Pong(ping)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Device socket for alert {} closed", alert_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_hello_parsing() {
        let offer: DeviceHello =
            serde_json::from_str(r#"{"type": "offer", "audio": true, "video": true}"#).unwrap();
        assert_eq!(
            offer,
            DeviceHello::Offer {
                audio: true,
                video: true
            }
        );

        let video_only: DeviceHello = serde_json::from_str(r#"{"type": "offer", "video": true}"#).unwrap();
        assert_eq!(
            video_only,
            DeviceHello::Offer {
                audio: false,
                video: true
            }
        );

        let reject: DeviceHello =
            serde_json::from_str(r#"{"type": "reject", "reason": "permission denied"}"#).unwrap();
        assert_eq!(
            reject,
            DeviceHello::Reject {
                reason: "permission denied".to_string()
            }
        );

        assert!(serde_json::from_str::<DeviceHello>(r#"{"type": "hello"}"#).is_err());
    }
}
