use super::*;
use crate::alerts::test_support::new_alert;
use crate::alerts::{AlertStatus, AlertStore};
use crate::capture::{CaptureDesk, ConnectionState, DeviceRelay, MediaFrame, TrackSet};
use crate::config::{CaptureConfig, EscalationConfig};
use crate::error::Error;
use crate::messaging::test_support::{FailingPublisher, RecordingPublisher};
use crate::messaging::{AlertEvents, EventPublisher, EventType};
use crate::notifications::{BrokerDispatcher, DispatchReceipt, NotificationGateway};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Console {
    controller: EscalationController,
    store: Arc<AlertStore>,
    relay: DeviceRelay,
    desk: Arc<CaptureDesk>,
    publisher: Arc<RecordingPublisher>,
    _dir: TempDir,
}

fn console_with(dispatch: Arc<dyn EventPublisher>, auto_record: bool) -> Console {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Arc::new(RecordingPublisher::default());
    let events = AlertEvents::new(publisher.clone());

    let store = Arc::new(AlertStore::new());
    let gateway = Arc::new(NotificationGateway::new(
        Arc::new(BrokerDispatcher::new(dispatch)),
        EscalationConfig::default(),
    ));
    let relay = DeviceRelay::new(events.clone(), "http://localhost:4760", 16);
    let capture = CaptureConfig {
        storage_path: dir.path().to_path_buf(),
        negotiation_timeout_secs: 2,
        chunk_millis: 50,
        auto_record,
        ..CaptureConfig::default()
    };
    let desk = Arc::new(CaptureDesk::new(
        Arc::new(relay.clone()),
        capture,
        events.clone(),
    ));
    let controller = EscalationController::new(store.clone(), gateway, desk.clone(), events);

    Console {
        controller,
        store,
        relay,
        desk,
        publisher,
        _dir: dir,
    }
}

fn console(auto_record: bool) -> Console {
    let publisher = Arc::new(RecordingPublisher::default());
    console_with(publisher, auto_record)
}

impl Console {
    /// Play the device side: wait for the request, then attach with audio and video
    async fn device_answers(&self, alert_id: &str) -> Result<tokio::sync::mpsc::Sender<MediaFrame>> {
        for _ in 0..200 {
            if self.relay.is_pending(alert_id) {
                let attachment = self.relay.attach(
                    alert_id,
                    TrackSet {
                        audio: true,
                        video: true,
                    },
                )?;
                return Ok(attachment.frames);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        anyhow::bail!("no stream request for {}", alert_id)
    }

    async fn wait_connected(&self) -> Result<()> {
        for _ in 0..200 {
            if let Some(snapshot) = self.desk.snapshot().await {
                if snapshot.connection_state == ConnectionState::Connected {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        anyhow::bail!("session never connected")
    }
}

#[tokio::test]
async fn test_stream_scenario_keeps_alert_urgent() -> Result<()> {
    let c = console(false);
    c.store.add(new_alert("A1", true))?;

    let outcome = c.controller.apply_action("A1", Action::StartStream).await?;
    match outcome {
        ActionOutcome::StreamStarting { session } => {
            assert_eq!(session.connection_state, ConnectionState::Connecting)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(c.store.get("A1")?.urgent);

    let _device = c.device_answers("A1").await?;
    c.wait_connected().await?;
    assert!(c.store.get("A1")?.urgent);

    let outcome = c.controller.apply_action("A1", Action::StopStream).await?;
    match outcome {
        ActionOutcome::StreamStopped {
            session_id,
            artifact,
        } => {
            assert!(session_id.is_some());
            // Recording was never started
            assert!(artifact.is_none());
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert!(c.desk.snapshot().await.is_none());
    let alert = c.store.get("A1")?;
    assert_eq!(alert.status, AlertStatus::Active);
    assert!(alert.urgent);
    assert!(c.desk.artifacts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_email_then_resolve_scenario() -> Result<()> {
    let c = console(true);
    c.store.add(new_alert("A2", false))?;

    let outcome = c
        .controller
        .apply_action("A2", Action::EmailAuthorities)
        .await?;
    assert!(matches!(
        outcome,
        ActionOutcome::Notified {
            channel: Some(NotificationChannel::Authorities),
            receipt: DispatchReceipt::Sent { .. },
        }
    ));

    let alert = c.store.get("A2")?;
    assert!(alert.was_notified(NotificationChannel::Authorities));
    assert!(!alert.urgent);

    c.controller.apply_action("A2", Action::Resolve).await?;
    assert!(c.store.list()?.iter().all(|a| a.id != "A2"));
    assert_eq!(c.store.stats()?.resolved_today, 1);
    assert_eq!(c.publisher.of_type(&EventType::AlertResolved).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_each_notification_clears_urgency() -> Result<()> {
    let c = console(true);
    for (id, action) in [
        ("C1", Action::CallAuthorities),
        ("C2", Action::NotifyVendor),
        ("C3", Action::EmailAuthorities),
    ] {
        c.store.add(new_alert(id, true))?;
        assert!(c.store.get(id)?.urgent);

        c.controller.apply_action(id, action).await?;
        assert!(!c.store.get(id)?.urgent, "{} left {} urgent", action, id);
    }

    assert!(c
        .store
        .get("C2")?
        .was_notified(NotificationChannel::SecurityVendor));
    // The emergency call is not a tracked channel
    assert!(c.store.get("C1")?.notifications_sent.is_empty());
    assert_eq!(c.store.stats()?.authority_calls_today, 1);
    assert_eq!(c.store.stats()?.urgent, 0);
    Ok(())
}

#[tokio::test]
async fn test_call_dials_configured_number() -> Result<()> {
    let dispatch = Arc::new(RecordingPublisher::default());
    let c = console_with(dispatch.clone(), true);
    c.store.add(new_alert("A1", false))?;

    let outcome = c
        .controller
        .apply_action("A1", Action::CallAuthorities)
        .await?;
    assert!(matches!(
        outcome,
        ActionOutcome::Notified {
            channel: None,
            receipt: DispatchReceipt::Dispatched { .. },
        }
    ));

    let dials = dispatch.of_type(&EventType::NotificationDial);
    assert_eq!(dials.len(), 1);
    assert_eq!(dials[0].payload["number"], "10111");
    Ok(())
}

#[tokio::test]
async fn test_delivery_failure_still_clears_urgency() -> Result<()> {
    let c = console_with(Arc::new(FailingPublisher), true);
    c.store.add(new_alert("A1", false))?;

    let err = c
        .controller
        .apply_action("A1", Action::EmailAuthorities)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Delivery(_)));

    let alert = c.store.get("A1")?;
    assert!(!alert.urgent);
    assert!(!alert.was_notified(NotificationChannel::Authorities));

    // The dial is fire and forget
    c.store.add(new_alert("A2", false))?;
    c.controller
        .apply_action("A2", Action::CallAuthorities)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_stream_requires_capable_device() -> Result<()> {
    let c = console(true);
    c.store.add(new_alert("A1", false))?;

    let err = c
        .controller
        .apply_action("A1", Action::StartStream)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamUnavailable(_)));
    assert!(c.store.get("A1")?.urgent);
    assert!(c.desk.snapshot().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_and_resolved_alerts() -> Result<()> {
    let c = console(true);

    let err = c
        .controller
        .apply_action("nope", Action::NotifyVendor)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    c.store.add(new_alert("A1", false))?;
    c.controller.apply_action("A1", Action::Resolve).await?;

    for action in [
        Action::CallAuthorities,
        Action::NotifyVendor,
        Action::EmailAuthorities,
        Action::StartStream,
        Action::Resolve,
    ] {
        let err = c.controller.apply_action("A1", action).await.unwrap_err();
        assert!(
            matches!(err, Error::AlreadyResolved(_)),
            "{} gave {:?}",
            action,
            err
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_second_stream_is_busy() -> Result<()> {
    let c = console(true);
    c.store.add(new_alert("A1", true))?;
    c.store.add(new_alert("A3", true))?;

    c.controller.apply_action("A1", Action::StartStream).await?;
    let _device = c.device_answers("A1").await?;
    c.wait_connected().await?;

    let err = c
        .controller
        .apply_action("A3", Action::StartStream)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionBusy(_)));

    let snapshot = c.desk.snapshot().await.unwrap();
    assert_eq!(snapshot.alert_id, "A1");
    assert_eq!(snapshot.connection_state, ConnectionState::Connected);
    Ok(())
}

#[tokio::test]
async fn test_resolve_tears_down_recording() -> Result<()> {
    let c = console(true);
    c.store.add(new_alert("A1", true))?;

    c.controller.apply_action("A1", Action::StartStream).await?;
    let device = c.device_answers("A1").await?;
    c.wait_connected().await?;
    device.send(MediaFrame::new(b"evidence".to_vec())).await?;

    let outcome = c.controller.apply_action("A1", Action::Resolve).await?;
    let artifact = match outcome {
        ActionOutcome::Resolved { alert, artifact } => {
            assert_eq!(alert.status, AlertStatus::Resolved);
            artifact.expect("live recording is exported")
        }
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(std::fs::read(&artifact.path)?, b"evidence");
    assert!(c.desk.snapshot().await.is_none());
    assert!(c.store.list()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_resolve_racing_restart_leaves_no_session() -> Result<()> {
    let c = console(true);
    c.store.add(new_alert("A1", true))?;

    c.controller.apply_action("A1", Action::StartStream).await?;
    let _device = c.device_answers("A1").await?;
    c.wait_connected().await?;

    // Two handlers fire in the same tick; the restart lands while teardown is in progress
    let (resolved, restarted) = tokio::join!(
        c.controller.apply_action("A1", Action::Resolve),
        c.controller.apply_action("A1", Action::StartStream)
    );
    assert!(matches!(
        resolved?,
        ActionOutcome::Resolved {
            artifact: Some(_),
            ..
        }
    ));
    assert!(matches!(
        restarted.unwrap_err(),
        Error::AlreadyResolved(_)
    ));

    assert!(c.desk.snapshot().await.is_none());
    assert!(!c.relay.is_pending("A1"));
    assert!(c.store.list()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_resolve_and_start_stream_in_either_order() -> Result<()> {
    for resolve_first in [true, false] {
        let c = console(true);
        c.store.add(new_alert("A1", true))?;

        let (resolved, started) = if resolve_first {
            tokio::join!(
                c.controller.apply_action("A1", Action::Resolve),
                c.controller.apply_action("A1", Action::StartStream)
            )
        } else {
            let (started, resolved) = tokio::join!(
                c.controller.apply_action("A1", Action::StartStream),
                c.controller.apply_action("A1", Action::Resolve)
            );
            (resolved, started)
        };
        resolved?;
        if resolve_first {
            assert!(matches!(started.unwrap_err(), Error::AlreadyResolved(_)));
        } else {
            assert!(matches!(started?, ActionOutcome::StreamStarting { .. }));
        }

        // Resolution wins whichever handler ran first
        assert!(c.desk.snapshot().await.is_none(), "resolve_first={}", resolve_first);
        assert!(!c.relay.is_pending("A1"));
        assert!(c.store.list()?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn test_stop_and_start_stream_in_the_same_tick() -> Result<()> {
    for stop_first in [true, false] {
        let c = console(true);
        c.store.add(new_alert("A1", true))?;

        c.controller.apply_action("A1", Action::StartStream).await?;
        let _device = c.device_answers("A1").await?;
        c.wait_connected().await?;

        let (stopped, started) = if stop_first {
            tokio::join!(
                c.controller.apply_action("A1", Action::StopStream),
                c.controller.apply_action("A1", Action::StartStream)
            )
        } else {
            let (started, stopped) = tokio::join!(
                c.controller.apply_action("A1", Action::StartStream),
                c.controller.apply_action("A1", Action::StopStream)
            );
            (stopped, started)
        };
        assert!(matches!(
            stopped?,
            ActionOutcome::StreamStopped {
                session_id: Some(_),
                artifact: Some(_),
            }
        ));

        match started {
            Ok(ActionOutcome::StreamStarting { session }) => {
                assert!(stop_first);
                let current = c.desk.snapshot().await.map(|s| s.session_id);
                assert_eq!(current, Some(session.session_id));
                c.controller.apply_action("A1", Action::StopStream).await?;
            }
            Ok(other) => panic!("unexpected outcome {:?}", other),
            Err(e) => {
                assert!(!stop_first);
                assert!(matches!(e, Error::SessionBusy(_)));
            }
        }

        assert!(c.desk.snapshot().await.is_none());
        assert!(!c.relay.is_pending("A1"));
        assert_eq!(c.desk.artifacts().len(), 1);
        assert!(c.store.get("A1")?.urgent);
    }
    Ok(())
}

#[tokio::test]
async fn test_stop_stream_without_session_is_noop() -> Result<()> {
    let c = console(true);
    c.store.add(new_alert("A1", true))?;

    let outcome = c.controller.apply_action("A1", Action::StopStream).await?;
    assert!(matches!(
        outcome,
        ActionOutcome::StreamStopped {
            session_id: None,
            artifact: None,
        }
    ));
    assert!(c.store.get("A1")?.urgent);
    Ok(())
}

#[test]
fn test_action_wire_names() -> Result<()> {
    let action: Action = serde_json::from_str("\"email_authorities\"")?;
    assert_eq!(action, Action::EmailAuthorities);
    assert_eq!(serde_json::to_string(&Action::StartStream)?, "\"start_stream\"");
    assert!(!Action::StartStream.clears_urgency());
    assert!(Action::NotifyVendor.clears_urgency());
    Ok(())
}
