//! Controller configuration.
//!
//! Loaded from a TOML or JSON file and then overridden from the environment.
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::naming::{NamingConfig, DEFAULT_FINALIZER};
use crate::notify::NotificationPolicy;
use crate::retry::RetryPolicy;

/// Top-level controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    /// Deadline for a single reconciliation pass.
    #[serde(rename = "pass_timeout_ms", with = "duration_ms")]
    pub pass_timeout: Duration,
    /// Interval at which every monster is re-queued regardless of events.
    /// Zero disables the periodic resync.
    #[serde(rename = "resync_period_ms", with = "duration_ms")]
    pub resync_period: Duration,
    pub rate_limit: RateLimitConfig,
    pub conflict_retry: RetryPolicy,
    pub notification: NotificationConfig,
    pub naming: NamingConfig,
    /// Finalizer token this controller owns.
    pub finalizer: String,
    pub workload: WorkloadConfig,
    pub ingress: IngressConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            pass_timeout: Duration::from_secs(30),
            resync_period: Duration::from_secs(600),
            rate_limit: RateLimitConfig::default(),
            conflict_retry: RetryPolicy::default(),
            notification: NotificationConfig::default(),
            naming: NamingConfig::default(),
            finalizer: DEFAULT_FINALIZER.to_string(),
            workload: WorkloadConfig::default(),
            ingress: IngressConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables on top of the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration from a file.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigRead` if the file cannot be read and `InvalidConfig`
    /// if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))
        }
    }

    /// Override fields from `DUNGEON_*` environment variables.
    ///
    /// Unparseable values are ignored and the current value kept.
    pub fn apply_env(&mut self) {
        if let Some(workers) = env_parse("DUNGEON_WORKERS") {
            self.workers = workers;
        }

        if let Some(ms) = env_parse("DUNGEON_PASS_TIMEOUT_MS") {
            self.pass_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse("DUNGEON_RESYNC_PERIOD_MS") {
            self.resync_period = Duration::from_millis(ms);
        }

        if let Ok(url) = std::env::var("DUNGEON_PORTAL_URL") {
            self.notification.base_url = url;
        }

        if let Ok(policy) = std::env::var("DUNGEON_NOTIFY_POLICY") {
            match policy.to_lowercase().as_str() {
                "required" => self.notification.policy = NotificationPolicy::Required,
                "best-effort" | "best_effort" => {
                    self.notification.policy = NotificationPolicy::BestEffort;
                }
                _ => {}
            }
        }
    }

    /// Reject settings the controller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.conflict_retry.max_attempts == 0 {
            return Err(Error::invalid_config(
                "conflict_retry.max_attempts must be at least 1",
            ));
        }
        if self.rate_limit.base_delay > self.rate_limit.max_delay {
            return Err(Error::invalid_config(
                "rate_limit.base_delay_ms must not exceed rate_limit.max_delay_ms",
            ));
        }
        if self.finalizer.is_empty() {
            return Err(Error::invalid_config("finalizer must not be empty"));
        }
        self.notification.endpoint()?;
        self.naming.validate()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

/// Per-key failure backoff used by the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Where and how deletion notices are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Portal service base URL.
    pub base_url: String,
    pub path: String,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    pub policy: NotificationPolicy,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://portal-service.portal.svc.cluster.local:5000".to_string(),
            path: "/monsters/notify-deletion".to_string(),
            timeout: Duration::from_secs(10),
            policy: NotificationPolicy::default(),
        }
    }
}

impl NotificationConfig {
    /// Full URL of the deletion-notice endpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the path cannot be joined onto the base URL.
    pub fn endpoint(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(&self.path))
            .map_err(|e| Error::invalid_config(format!("notification endpoint: {e}")))
    }
}

/// Settings for the rendered workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub image: String,
    /// Container, service and ingress backend port.
    pub port: u16,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            image: "nginx:latest".to_string(),
            port: 8000,
        }
    }
}

/// Settings for the rendered exposure resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub class_name: String,
    pub host: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            class_name: "traefik".to_string(),
            host: "localhost".to_string(),
        }
    }
}

/// Serialization helper for Duration as milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
