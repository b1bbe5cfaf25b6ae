use crate::alerts::AlertStore;
use crate::config::UrgencyConfig;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

/// Redraw pulse for the flashing indicator
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UrgencyPulse {
    /// Alternates every tick; the view lights urgent alerts when true
    pub lit: bool,
    pub alert_ids: Vec<String>,
    pub at: DateTime<Utc>,
}

/// Derives urgency from the store and emits a redraw cadence.
///
/// Holds no per-alert state: every pulse is recomputed from the store, so a
/// removed alert stops flashing on the next tick.
pub struct UrgencyTicker {
    store: Arc<AlertStore>,
    config: UrgencyConfig,
    pulses: broadcast::Sender<UrgencyPulse>,
    shutdown: CancellationToken,
}

impl UrgencyTicker {
    pub fn new(store: Arc<AlertStore>, config: UrgencyConfig) -> Self {
        let (pulses, _) = broadcast::channel(16);
        Self {
            store,
            config,
            pulses,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_urgent(&self, alert_id: &str) -> bool {
        self.store
            .get(alert_id)
            .map(|alert| alert.urgent)
            .unwrap_or(false)
    }

    /// Ids of urgent alerts in store order
    pub fn urgent_ids(&self) -> Vec<String> {
        match self.store.list() {
            Ok(alerts) => alerts
                .into_iter()
                .filter(|a| a.urgent)
                .map(|a| a.id)
                .collect(),
            Err(e) => {
                warn!("Could not read alerts for urgency pulse: {}", e);
                Vec::new()
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UrgencyPulse> {
        self.pulses.subscribe()
    }

    /// Start ticking in the background until `stop` is called
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting urgency ticker with a {} ms cadence",
            self.config.tick_millis
        );

        tokio::spawn(async move {
            let mut ticks = interval(Duration::from_millis(self.config.tick_millis));
            let mut lit = false;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticks.tick() => {
                        lit = !lit;
                        let pulse = UrgencyPulse {
                            lit,
                            alert_ids: self.urgent_ids(),
                            at: Utc::now(),
                        };
                        // No subscribers is fine; nobody is looking
                        let _ = self.pulses.send(pulse);
                    }
                }
            }

            debug!("Urgency ticker stopped");
        })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
