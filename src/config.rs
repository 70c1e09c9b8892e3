//! Configuration types and validation for viewing sessions

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::watermark::MIN_GRID_SIZE;

/// Backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime assumed for access tokens that carry no `exp` claim
    pub access_token_ttl_secs: u64,
}

/// Threat monitor timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    pub focus_return_grace_ms: u64,
    pub capture_key_grace_ms: u64,
    pub precaution_grace_ms: u64,
    pub critical_grace_ms: u64,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub forced_close_delay_ms: u64,
    pub visibility_alert_threshold: u32,
}

/// Watermark overlay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub refresh_interval_ms: u64,
    pub grid_size: u32,
    pub rotation_speed_deg_per_sec: f64,
}

/// Viewer surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub surface_load_timeout_ms: u64,
    pub container_padding: f64,
    pub zoom_step: f64,
}

/// Audit ring buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub capacity: usize,
}

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub threat: ThreatConfig,
    pub watermark: WatermarkConfig,
    pub viewer: ViewerConfig,
    pub audit: AuditConfig,
    pub store_path: Option<String>,
}

// Defaults
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: 15 * 60,
        }
    }
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            focus_return_grace_ms: 500,
            capture_key_grace_ms: 1000,
            precaution_grace_ms: 2000,
            critical_grace_ms: 3000,
            probe_interval_ms: 2000,
            probe_timeout_ms: 1500,
            forced_close_delay_ms: 5000,
            visibility_alert_threshold: 3,
        }
    }
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            grid_size: 5,
            rotation_speed_deg_per_sec: 5.0,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            surface_load_timeout_ms: 10_000,
            container_padding: 40.0,
            zoom_step: 0.1,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl ThreatConfig {
    pub fn focus_return_grace(&self) -> Duration {
        Duration::from_millis(self.focus_return_grace_ms)
    }

    pub fn capture_key_grace(&self) -> Duration {
        Duration::from_millis(self.capture_key_grace_ms)
    }

    pub fn precaution_grace(&self) -> Duration {
        Duration::from_millis(self.precaution_grace_ms)
    }

    pub fn critical_grace(&self) -> Duration {
        Duration::from_millis(self.critical_grace_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn forced_close_delay(&self) -> Duration {
        Duration::from_millis(self.forced_close_delay_ms)
    }
}

impl Config {
    /// Loads a configuration file, trying JSON first and YAML second
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: Config = serde_json::from_str(&content)
            .or_else(|_| serde_yaml::from_str(&content))
            .map_err(|e| Error::ConfigError(format!("Config parsing error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(Error::InvalidConfiguration(format!(
                "API base URL must be http(s): {}",
                self.api.base_url
            )));
        }
        if self.watermark.refresh_interval_ms == 0 || self.watermark.refresh_interval_ms > 1000 {
            return Err(Error::InvalidConfiguration(
                "Watermark must refresh at least once per second".into(),
            ));
        }
        if self.watermark.grid_size < MIN_GRID_SIZE {
            return Err(Error::InvalidConfiguration(format!(
                "Watermark grid needs at least {} tiles per axis",
                MIN_GRID_SIZE
            )));
        }
        if self.audit.capacity == 0 {
            return Err(Error::InvalidConfiguration("Audit capacity must be at least 1".into()));
        }
        if self.threat.probe_interval_ms == 0 {
            return Err(Error::InvalidConfiguration("Probe interval must be non-zero".into()));
        }
        if self.viewer.zoom_step <= 0.0 {
            return Err(Error::InvalidConfiguration("Zoom step must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn surface_load_timeout(&self) -> Duration {
        Duration::from_millis(self.viewer.surface_load_timeout_ms)
    }

    pub fn watermark_refresh(&self) -> Duration {
        Duration::from_millis(self.watermark.refresh_interval_ms)
    }
}
