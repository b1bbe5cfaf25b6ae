use crate::alerts::models::{
    AlertId, AlertStats, AlertStatus, NewAlert, NotificationChannel, SecurityAlert,
};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory set of open alerts.
///
/// Every mutation takes the table's write lock, so updates to a single alert
/// are atomic. `list()` returns alerts in the order they were added.
pub struct AlertStore {
    inner: RwLock<AlertTable>,
}

struct StoredAlert {
    seq: u64,
    alert: SecurityAlert,
}

#[derive(Default)]
struct AlertTable {
    next_seq: u64,
    alerts: HashMap<AlertId, StoredAlert>,
    resolved: HashMap<AlertId, DateTime<Utc>>,
    counters: DailyCounters,
}

#[derive(Default)]
struct DailyCounters {
    day: Option<NaiveDate>,
    authority_calls: u32,
    resolved: u32,
}

impl DailyCounters {
    fn roll(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.authority_calls = 0;
            self.resolved = 0;
        }
    }
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AlertTable::default()),
        }
    }

    /// Insert a new alert; it starts `Active` and urgent
    pub fn add(&self, new_alert: NewAlert) -> Result<SecurityAlert> {
        let mut table = self.write()?;

        if table.alerts.contains_key(&new_alert.id) || table.resolved.contains_key(&new_alert.id)
        {
            return Err(Error::DuplicateId(new_alert.id));
        }

        let alert = SecurityAlert::from(new_alert);
        let seq = table.next_seq;
        table.next_seq += 1;
        table.alerts.insert(
            alert.id.clone(),
            StoredAlert {
                seq,
                alert: alert.clone(),
            },
        );

        info!(
            "Alert {} added for {} at {}",
            alert.id, alert.reporter.name, alert.location.address
        );
        Ok(alert)
    }

    pub fn get(&self, id: &str) -> Result<SecurityAlert> {
        let table = self.read()?;
        match table.alerts.get(id) {
            Some(stored) => Ok(stored.alert.clone()),
            None => Err(table.missing(id)),
        }
    }

    /// Open alerts in insertion order
    pub fn list(&self) -> Result<Vec<SecurityAlert>> {
        let table = self.read()?;
        let mut stored: Vec<&StoredAlert> = table.alerts.values().collect();
        stored.sort_by_key(|s| s.seq);
        Ok(stored.into_iter().map(|s| s.alert.clone()).collect())
    }

    /// Remove a resolved alert, remembering its id
    pub fn remove(&self, id: &str) -> Result<SecurityAlert> {
        let mut table = self.write()?;
        let mut stored = match table.alerts.remove(id) {
            Some(stored) => stored,
            None => return Err(table.missing(id)),
        };

        let now = Utc::now();
        stored.alert.status = AlertStatus::Resolved;
        stored.alert.urgent = false;
        table.resolved.insert(id.to_string(), now);
        table.counters.roll(now.date_naive());
        table.counters.resolved += 1;

        info!("Alert {} removed", id);
        Ok(stored.alert)
    }

    pub fn set_urgent(&self, id: &str, value: bool) -> Result<()> {
        self.update(id, |alert| {
            if alert.urgent != value {
                debug!("Alert {} urgency {} -> {}", alert.id, alert.urgent, value);
            }
            alert.urgent = value;
        })
    }

    /// Record a dispatched channel; the set only ever grows
    pub fn mark_notified(&self, id: &str, channel: NotificationChannel) -> Result<()> {
        self.update(id, |alert| {
            if alert.notifications_sent.insert(channel) {
                info!("Alert {} notified via {}", alert.id, channel);
            }
        })
    }

    pub fn record_authority_call(&self) -> Result<()> {
        let mut table = self.write()?;
        table.counters.roll(Utc::now().date_naive());
        table.counters.authority_calls += 1;
        Ok(())
    }

    pub fn stats(&self) -> Result<AlertStats> {
        let mut table = self.write()?;
        table.counters.roll(Utc::now().date_naive());

        Ok(AlertStats {
            active: table.alerts.len(),
            urgent: table.alerts.values().filter(|s| s.alert.urgent).count(),
            authority_calls_today: table.counters.authority_calls,
            resolved_today: table.counters.resolved,
        })
    }

    fn update<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SecurityAlert),
    {
        let mut table = self.write()?;
        if let Some(stored) = table.alerts.get_mut(id) {
            apply(&mut stored.alert);
            return Ok(());
        }
        Err(table.missing(id))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, AlertTable>> {
        self.inner
            .read()
            .map_err(|_| Error::Internal("alert store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, AlertTable>> {
        self.inner
            .write()
            .map_err(|_| Error::Internal("alert store lock poisoned".to_string()))
    }
}

impl AlertTable {
    fn missing(&self, id: &str) -> Error {
        if self.resolved.contains_key(id) {
            Error::AlreadyResolved(id.to_string())
        } else {
            Error::NotFound(id.to_string())
        }
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}
