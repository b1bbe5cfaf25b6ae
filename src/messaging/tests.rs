use super::broker::{create_publisher, EventPublisher};
use super::event::{EventMessage, EventType};
use super::test_support::{FailingPublisher, RecordingPublisher};
use super::AlertEvents;
use crate::config::MessageBrokerConfig;
use anyhow::Result;
use std::sync::Arc;

#[test]
fn test_routing_key_includes_source() -> Result<()> {
    let event = EventMessage::new(
        EventType::AlertResolved,
        Some("A1"),
        serde_json::json!({"alert_id": "A1"}),
    )?;
    assert_eq!(event.routing_key(), "alert.resolved.A1");

    let event = EventMessage::new(EventType::SystemStartup, None, serde_json::json!({}))?;
    assert_eq!(event.routing_key(), "system.startup");
    Ok(())
}

#[tokio::test]
async fn test_disabled_broker_falls_back_to_log() -> Result<()> {
    let publisher = create_publisher(MessageBrokerConfig::default()).await?;
    publisher
        .publish(EventMessage::new(
            EventType::SystemStartup,
            None,
            serde_json::json!({"component": "test"}),
        )?)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_alert_events_reach_publisher() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let events = AlertEvents::new(publisher.clone());

    events.stream_requested("A1", "http://console/ws/devices/A1").await;
    events.action_taken("A1", "call_authorities", false).await;

    let requested = publisher.of_type(&EventType::StreamRequested);
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].source_id.as_deref(), Some("A1"));
    assert_eq!(
        requested[0].payload["ingest_url"],
        "http://console/ws/devices/A1"
    );
    assert_eq!(publisher.events().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_publish_failure_is_swallowed() {
    let events = AlertEvents::new(Arc::new(FailingPublisher));
    // Must not panic or propagate
    events.alert_notified("A1", crate::alerts::NotificationChannel::Authorities).await;
}

// Needs a running RabbitMQ
#[tokio::test]
async fn test_broker_publish() -> Result<()> {
    if std::env::var("TEST_RABBITMQ").is_err() {
        println!("Skipping RabbitMQ test. Set TEST_RABBITMQ=1 to run.");
        return Ok(());
    }

    let config = MessageBrokerConfig {
        enabled: true,
        exchange: format!("test.exchange.{}", uuid::Uuid::new_v4()),
        ..MessageBrokerConfig::default()
    };
    let publisher = create_publisher(config).await?;
    publisher
        .publish(EventMessage::new(
            EventType::SystemStartup,
            None,
            serde_json::json!({"test": true}),
        )?)
        .await?;
    Ok(())
}
