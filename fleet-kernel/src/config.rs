use crate::alerts::AlertSeverity;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub liveness: LivenessConfig,
    pub thresholds: Thresholds,
    pub publisher: PublisherConfig,
    pub udp: UdpConf,
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Silence after which a live node is marked offline.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// How far behind `last_seen` a heartbeat may be before it is treated as a replay.
    #[serde(with = "humantime_serde")]
    pub skew_tolerance: Duration,
    /// How far ahead of local receipt time a reported timestamp is trusted.
    #[serde(with = "humantime_serde")]
    pub future_tolerance: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            skew_tolerance: Duration::from_secs(30),
            future_tolerance: Duration::from_secs(5),
        }
    }
}

/// Warning and critical bands for one monitored dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f32,
    pub critical: f32,
}

impl Threshold {
    pub const fn new(warning: f32, critical: f32) -> Self {
        Self { warning, critical }
    }

    /// `None` while the value is at or under the warning band.
    pub fn severity_for(&self, value: f32) -> Option<AlertSeverity> {
        if value >= self.critical && value > self.warning {
            Some(AlertSeverity::Critical)
        } else if value > self.warning {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu: Option<Threshold>,
    pub memory: Option<Threshold>,
    pub disk: Option<Threshold>,
    pub temperature: Option<Threshold>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: Some(Threshold::new(90.0, 95.0)),
            memory: Some(Threshold::new(90.0, 95.0)),
            disk: Some(Threshold::new(90.0, 95.0)),
            temperature: Some(Threshold::new(80.0, 90.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// `NodeChanged` only on status transitions.
    #[default]
    Transitions,
    /// Also re-announce the node on every accepted heartbeat.
    EveryHeartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub queue_capacity: usize,
    pub mode: PublishMode,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024, mode: PublishMode::Transitions }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConf {
    pub bind: String,
}

impl Default for UdpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8765".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    "fleet-kernel".into()
}

/// Upper bound for liveness durations; timestamp arithmetic with larger values overflows.
pub const MAX_LIVENESS_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("liveness.{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("liveness.{0} must not exceed one year")]
    DurationTooLong(&'static str),
    #[error("publisher.queue_capacity must be greater than zero")]
    ZeroCapacity,
    #[error("thresholds.{dimension}: critical ({critical}) is below warning ({warning})")]
    InvertedThreshold { dimension: &'static str, warning: f32, critical: f32 },
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("timeout"));
        }
        if self.liveness.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep_interval"));
        }
        let durations = [
            ("timeout", self.liveness.timeout),
            ("sweep_interval", self.liveness.sweep_interval),
            ("skew_tolerance", self.liveness.skew_tolerance),
            ("future_tolerance", self.liveness.future_tolerance),
        ];
        if let Some((name, _)) = durations.into_iter().find(|(_, d)| *d > MAX_LIVENESS_DURATION) {
            return Err(ConfigError::DurationTooLong(name));
        }
        if self.publisher.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let bands = [
            ("cpu", self.thresholds.cpu),
            ("memory", self.thresholds.memory),
            ("disk", self.thresholds.disk),
            ("temperature", self.thresholds.temperature),
        ];
        for (name, band) in bands {
            if let Some(t) = band {
                if t.critical < t.warning {
                    return Err(ConfigError::InvertedThreshold {
                        dimension: name,
                        warning: t.warning,
                        critical: t.critical,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Reads `FLEET_KERNEL_CONFIG` (default `kernel.yaml`). A missing or empty file
/// yields the defaults; an unparseable one is reported and replaced by the defaults.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("FLEET_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            tracing::warn!(path = %path, error = %e, "invalid config, using defaults");
            KernelConfig::default()
        })
    } else {
        tracing::info!(path = %path, "no config file, using defaults");
        KernelConfig::default()
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_fleet_cadence() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.liveness.timeout, Duration::from_secs(300));
        assert_eq!(cfg.liveness.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.udp.bind, "0.0.0.0:8765");
        assert!(cfg.mqtt.is_none());
        assert_eq!(cfg.publisher.mode, PublishMode::Transitions);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_with_humantime_durations() {
        let cfg = parse_config(
            r#"
liveness:
  timeout: 2m
  sweep_interval: 15s
thresholds:
  cpu: { warning: 80, critical: 92.5 }
  temperature: ~
publisher:
  mode: every_heartbeat
mqtt:
  host: broker.lan
  port: 1883
"#,
        )
        .unwrap();

        assert_eq!(cfg.liveness.timeout, Duration::from_secs(120));
        assert_eq!(cfg.liveness.sweep_interval, Duration::from_secs(15));
        // untouched fields keep their defaults
        assert_eq!(cfg.liveness.skew_tolerance, Duration::from_secs(30));
        assert_eq!(cfg.thresholds.cpu, Some(Threshold::new(80.0, 92.5)));
        assert!(cfg.thresholds.temperature.is_none());
        assert!(cfg.thresholds.memory.is_some());
        assert_eq!(cfg.publisher.mode, PublishMode::EveryHeartbeat);
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker.lan");
        assert_eq!(mqtt.client_id, "fleet-kernel");
    }

    #[test]
    fn empty_file_is_default() {
        let cfg = parse_config("   \n").unwrap();
        assert_eq!(cfg.publisher.queue_capacity, 1024);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = KernelConfig::default();
        cfg.liveness.timeout = Duration::ZERO;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroDuration("timeout")));

        let cfg = parse_config("liveness:\n  future_tolerance: 100000years\n").unwrap();
        assert_eq!(cfg.validate(), Err(ConfigError::DurationTooLong("future_tolerance")));

        let mut cfg = KernelConfig::default();
        cfg.liveness.timeout = MAX_LIVENESS_DURATION;
        assert!(cfg.validate().is_ok());

        let mut cfg = KernelConfig::default();
        cfg.publisher.queue_capacity = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCapacity));

        let mut cfg = KernelConfig::default();
        cfg.thresholds.disk = Some(Threshold::new(90.0, 50.0));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvertedThreshold { dimension: "disk", .. })
        ));
    }

    #[test]
    fn threshold_bands() {
        let t = Threshold::new(90.0, 95.0);
        assert_eq!(t.severity_for(90.0), None);
        assert_eq!(t.severity_for(90.5), Some(AlertSeverity::Warning));
        assert_eq!(t.severity_for(95.0), Some(AlertSeverity::Critical));
        assert_eq!(t.severity_for(99.0), Some(AlertSeverity::Critical));
    }
}
