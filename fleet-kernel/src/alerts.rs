/**
 * ALERT ENGINE - Node transitions and metric samples in, alerts out
 *
 * ROLE: Every alert carries a DedupKey; while an alert for a key is
 * unacknowledged, raising the same key again is suppressed.
 *
 * LIFECYCLE: nothing closes an alert automatically. A node that comes back
 * online, or a metric that drops under its threshold, leaves the alert open
 * until an operator acknowledges it.
 */

use crate::config::{Threshold, Thresholds};
use crate::liveness::NodeChanged;
use crate::models::{MetricsSample, NodeStatus};
use crate::state::{new_state, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertClass {
    Offline,
    CpuHigh,
    MemoryHigh,
    DiskHigh,
    TemperatureHigh,
    Manual,
}

/// Identity of the condition an alert reports on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub node: Option<String>,
    pub class: AlertClass,
    /// Only set for manual alerts, which are never deduplicated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Uuid>,
}

impl DedupKey {
    pub fn node(node: &str, class: AlertClass) -> Self {
        Self { node: Some(node.to_string()), class, nonce: None }
    }

    fn manual() -> Self {
        Self { node: None, class: AlertClass::Manual, nonce: Some(Uuid::new_v4()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub node: Option<String>,
    pub class: AlertClass,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub acknowledged: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub acknowledged_at: Option<OffsetDateTime>,
    pub dedup_key: DedupKey,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertFilter {
    #[default]
    All,
    Unacknowledged,
}

/// Result of [`AlertEngine::raise`].
#[derive(Debug, Clone, PartialEq)]
pub enum Raised {
    New(Alert),
    /// An unacknowledged alert already covers this key; it is returned as is.
    Suppressed(Alert),
}

impl Raised {
    pub fn into_new(self) -> Option<Alert> {
        match self {
            Raised::New(alert) => Some(alert),
            Raised::Suppressed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledged {
    pub alert: Alert,
    /// False when the alert had already been acknowledged.
    pub newly: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsVerdict {
    pub raised: Vec<Alert>,
    /// At least one dimension is over its warning band.
    pub breached: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert not found: {0}")]
    NotFound(String),
}

#[derive(Default)]
struct AlertBook {
    /// Creation order.
    alerts: Vec<Alert>,
    by_id: HashMap<String, usize>,
    /// Unacknowledged alert per dedup key.
    open: HashMap<DedupKey, usize>,
}

#[derive(Clone)]
pub struct AlertEngine {
    book: Shared<AlertBook>,
    thresholds: Thresholds,
}

impl AlertEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { book: new_state(AlertBook::default()), thresholds }
    }

    /// Opens an offline alert when a live node goes silent. Recovery does not
    /// acknowledge anything.
    pub fn on_node_changed(&self, change: &NodeChanged, at: OffsetDateTime) -> Option<Raised> {
        if change.to != NodeStatus::Offline || !change.from.is_live() {
            return None;
        }
        let name = &change.node.name;
        Some(self.raise(
            DedupKey::node(name, AlertClass::Offline),
            AlertSeverity::Warning,
            format!("Node {name} is offline"),
            at,
        ))
    }

    /// Checks every configured dimension of `sample` against its threshold.
    pub fn on_metrics(&self, node: &str, sample: &MetricsSample, at: OffsetDateTime) -> MetricsVerdict {
        let r = &sample.readings;
        let checks = [
            (AlertClass::CpuHigh, "CPU usage", "%", r.cpu_percent, self.thresholds.cpu),
            (AlertClass::MemoryHigh, "Memory usage", "%", r.memory_percent, self.thresholds.memory),
            (AlertClass::DiskHigh, "Disk usage", "%", r.disk_percent, self.thresholds.disk),
            (
                AlertClass::TemperatureHigh,
                "Temperature",
                "°C",
                r.temperature_celsius,
                self.thresholds.temperature,
            ),
        ];

        let mut verdict = MetricsVerdict::default();
        for (class, label, unit, value, threshold) in checks {
            let (Some(value), Some(threshold)) = (value, threshold) else { continue };
            let Some(severity) = threshold.severity_for(value) else { continue };
            verdict.breached = true;
            let message = breach_message(node, label, unit, value, &threshold);
            if let Raised::New(alert) = self.raise(DedupKey::node(node, class), severity, message, at) {
                verdict.raised.push(alert);
            }
        }
        verdict
    }

    /// Opens an alert unless an unacknowledged one already holds `key`.
    pub fn raise(
        &self,
        key: DedupKey,
        severity: AlertSeverity,
        message: String,
        at: OffsetDateTime,
    ) -> Raised {
        let mut book = self.book.lock();
        if let Some(&idx) = book.open.get(&key) {
            debug!(alert_id = %book.alerts[idx].id, class = ?key.class, "alert suppressed, already open");
            return Raised::Suppressed(book.alerts[idx].clone());
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            node: key.node.clone(),
            class: key.class,
            severity,
            message,
            created_at: at,
            acknowledged: false,
            acknowledged_at: None,
            dedup_key: key.clone(),
        };
        let idx = book.alerts.len();
        book.by_id.insert(alert.id.clone(), idx);
        book.open.insert(key, idx);
        book.alerts.push(alert.clone());

        info!(
            alert_id = %alert.id,
            node = alert.node.as_deref().unwrap_or("-"),
            severity = %alert.severity,
            message = %alert.message,
            "alert raised"
        );
        Raised::New(alert)
    }

    /// Idempotent: a second call returns the same alert with `newly == false`.
    pub fn acknowledge(&self, id: &str, at: OffsetDateTime) -> Result<Acknowledged, AlertError> {
        let mut book = self.book.lock();
        let idx = *book.by_id.get(id).ok_or_else(|| AlertError::NotFound(id.to_string()))?;

        if book.alerts[idx].acknowledged {
            return Ok(Acknowledged { alert: book.alerts[idx].clone(), newly: false });
        }

        let key = {
            let alert = &mut book.alerts[idx];
            alert.acknowledged = true;
            alert.acknowledged_at = Some(at);
            alert.dedup_key.clone()
        };
        if book.open.get(&key) == Some(&idx) {
            book.open.remove(&key);
        }

        let alert = book.alerts[idx].clone();
        info!(alert_id = %alert.id, "alert acknowledged");
        Ok(Acknowledged { alert, newly: true })
    }

    /// Operator-triggered, system-wide alert.
    pub fn manual_alert(&self, message: String, severity: AlertSeverity, at: OffsetDateTime) -> Alert {
        match self.raise(DedupKey::manual(), severity, message, at) {
            Raised::New(alert) | Raised::Suppressed(alert) => alert,
        }
    }

    /// Newest first.
    pub fn list(&self, filter: AlertFilter) -> Vec<Alert> {
        self.book
            .lock()
            .alerts
            .iter()
            .rev()
            .filter(|a| filter == AlertFilter::All || !a.acknowledged)
            .cloned()
            .collect()
    }

    pub fn find(&self, id: &str) -> Result<Alert, AlertError> {
        let book = self.book.lock();
        book.by_id
            .get(id)
            .map(|&idx| book.alerts[idx].clone())
            .ok_or_else(|| AlertError::NotFound(id.to_string()))
    }

    pub fn open_count(&self) -> usize {
        self.book.lock().open.len()
    }
}

fn breach_message(node: &str, label: &str, unit: &str, value: f32, threshold: &Threshold) -> String {
    format!("{label} on {node} is {value:.1}{unit} (threshold {:.1}{unit})", threshold.warning)
}
