//! Configuration management for the orchestrator.
//!
//! Provides a layered `OrchestratorConfig`: defaults baked into the struct,
//! overridable by a TOML file, overridable again by `ORCHESTRATOR_*`
//! environment variables. Nothing sensitive lives here — connection secrets
//! are resolved through [`crate::secrets::SecretStore`] at startup.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::types::ConfigError;

/// Root configuration object, composed of one section per component.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    pub transport: TransportConfig,
    pub router: RouterConfig,
    pub queue: QueueConfig,
    pub worker_pool: WorkerPoolConfig,
    pub saga: SagaConfig,
    pub sandbox: SandboxConfig,
    pub autoscaler: AutoscalerConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
    pub secrets: Option<crate::secrets::SecretsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 2 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Priority Router thresholds (§4.3, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Preemption grace period before a checkpoint+requeue must complete.
    #[serde(with = "humantime_serde")]
    pub preempt_grace: Duration,
    /// `max_preempts` — a task becomes sticky after this many preemptions.
    pub max_preempts: u32,
    /// Weighted strict priority fairness dial: every `fairness_n` high/critical
    /// dispatches, one lower-priority entry is admitted.
    pub fairness_n: u32,
    /// Queue depth above which new `low` submissions are rejected with backpressure.
    pub reject_threshold: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            preempt_grace: Duration::from_secs(2),
            max_preempts: 2,
            fairness_n: 16,
            reject_threshold: 1000,
        }
    }
}

/// Durable Queue tuning (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Approximate `maxlen` trimming target per stream.
    pub stream_maxlen: u64,
    pub append_retry_max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub append_retry_base_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            stream_maxlen: 100_000,
            append_retry_max_attempts: 5,
            append_retry_base_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Redis { url_secret_key: String },
}

/// Worker Pool Manager policy (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_reclaim: Duration,
    pub default_pool_min: u32,
    pub default_pool_max: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(30),
            idle_reclaim: Duration::from_secs(60),
            default_pool_min: 1,
            default_pool_max: 8,
        }
    }
}

/// Saga Engine retry/backoff policy (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaConfig {
    pub step_max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,
    pub compensation_max_attempts: u32,
    /// How long an idempotency key is remembered for duplicate-submission detection (§8 property 12).
    #[serde(with = "humantime_serde")]
    pub idempotency_retention: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(10),
            compensation_max_attempts: 3,
            idempotency_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Sandbox Manager defaults (§4.7, §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(with = "humantime_serde")]
    pub default_wallclock: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    pub default_output_bytes_cap: usize,
    pub allowed_image_tags: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_wallclock: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            default_output_bytes_cap: 1024 * 1024,
            allowed_image_tags: Vec::new(),
        }
    }
}

/// Autoscaler / SLA Monitor decision thresholds (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
    pub up_threshold: f64,
    pub down_threshold: f64,
    pub k_up: u32,
    pub k_down: u32,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(15),
            up_threshold: 0.75,
            down_threshold: 0.30,
            k_up: 3,
            k_down: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Recovery Supervisor cadence (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Telemetry export configuration (§10). Always carries a file exporter;
/// OTLP is additive and only built when the `metrics` feature is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub export_interval: Duration,
    pub service_name: String,
    pub file: Option<FileMetricsConfig>,
    pub otlp: Option<OtlpConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_interval: Duration::from_secs(60),
            service_name: "mcp-orchestrator".to_string(),
            file: Some(FileMetricsConfig::default()),
            otlp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetricsConfig {
    pub path: std::path::PathBuf,
    pub pretty_print: bool,
}

impl Default for FileMetricsConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("mcp_orchestrator_metrics.json"),
            pretty_print: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    pub endpoint: String,
    #[serde(default)]
    pub protocol: OtlpProtocol,
    #[serde(default = "default_otlp_timeout_secs")]
    pub timeout_seconds: u64,
}

fn default_otlp_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    HttpBinary,
    HttpJson,
}

impl OrchestratorConfig {
    /// Loads defaults, then a TOML file (if present), then `ORCHESTRATOR_*`
    /// environment overrides, then validates.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| ConfigError::ParseError(format!("reading {}: {e}", p.display())))?;
                toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("ORCHESTRATOR_PORT") {
            if let Ok(port) = port.parse() {
                self.transport.port = port;
            }
        }
        if let Ok(host) = env::var("ORCHESTRATOR_HOST") {
            self.transport.host = host;
        }
        if let Ok(level) = env::var("ORCHESTRATOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(n) = env::var("ORCHESTRATOR_FAIRNESS_N") {
            if let Ok(n) = n.parse() {
                self.router.fairness_n = n;
            }
        }
        if let Ok(max_attempts) = env::var("ORCHESTRATOR_MAX_ATTEMPTS") {
            if let Ok(max_attempts) = max_attempts.parse() {
                self.recovery.max_attempts = max_attempts;
            }
        }
    }

    /// Startup sanity checks beyond what `serde` already enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.fairness_n == 0 {
            return Err(ConfigError::Invalid("router.fairness_n must be >= 1".into()));
        }
        if self.autoscaler.up_threshold <= self.autoscaler.down_threshold {
            return Err(ConfigError::Invalid(
                "autoscaler.up_threshold must exceed autoscaler.down_threshold".into(),
            ));
        }
        if self.worker_pool.default_pool_min > self.worker_pool.default_pool_max {
            return Err(ConfigError::Invalid(
                "worker_pool.default_pool_min must not exceed default_pool_max".into(),
            ));
        }
        if self.recovery.max_attempts == 0 {
            return Err(ConfigError::Invalid("recovery.max_attempts must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_autoscaler_thresholds() {
        let mut config = OrchestratorConfig::default();
        config.autoscaler.up_threshold = 0.2;
        config.autoscaler.down_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_fairness_n() {
        let mut config = OrchestratorConfig::default();
        config.router.fairness_n = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_applies_port() {
        env::set_var("ORCHESTRATOR_PORT", "9999");
        let mut config = OrchestratorConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.transport.port, 9999);
        env::remove_var("ORCHESTRATOR_PORT");
    }
}
