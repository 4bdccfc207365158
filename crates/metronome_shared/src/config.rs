//! # Vsync Configuration
//!
//! Tunables for every component, loaded once at startup from TOML.
//! Every section and every key is optional; missing values fall back to
//! the production defaults.
//!
//! ```toml
//! [generator]
//! max_wakeup_delay_ns = 1500000
//! fire_tolerance_ns = 500000
//! priority = "realtime"
//!
//! [sampler]
//! error_threshold_ns2 = 40000000000
//!
//! [distributor]
//! soft_vsync_period_ms = 16
//!
//! [service]
//! rs_phase_offset_ns = 0
//! app_phase_offset_ns = 0
//!
//! [display]
//! refresh_rate_hz = 60
//! ```

use crate::constants::{
    DEFAULT_ERROR_THRESHOLD_NS2, DEFAULT_FIRE_TOLERANCE_NS, DEFAULT_MAX_WAKEUP_DELAY_NS,
    DEFAULT_SOFT_VSYNC_PERIOD_MS, NS_PER_SEC,
};
use crate::error::ConfigError;
use crate::priority::ThreadPriority;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Generator thread tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Clamp for the wake-up latency estimate.
    pub max_wakeup_delay_ns: i64,
    /// Listeners due within this window fire on the current wake.
    pub fire_tolerance_ns: i64,
    /// Requested scheduling class of the generator thread.
    pub priority: ThreadPriority,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_wakeup_delay_ns: DEFAULT_MAX_WAKEUP_DELAY_NS,
            fire_tolerance_ns: DEFAULT_FIRE_TOLERANCE_NS,
            priority: ThreadPriority::Realtime,
        }
    }
}

impl GeneratorConfig {
    /// Sets the scheduling class.
    #[must_use]
    pub const fn with_priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the fire tolerance window.
    #[must_use]
    pub const fn with_fire_tolerance_ns(mut self, ns: i64) -> Self {
        self.fire_tolerance_ns = ns;
        self
    }
}

/// Sampler tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Mean squared present-fence error above which a resync is requested.
    pub error_threshold_ns2: i64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            error_threshold_ns2: DEFAULT_ERROR_THRESHOLD_NS2,
        }
    }
}

/// Distributor thread tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// Software tick interval while requesters wait; 0 disables synthesis.
    pub soft_vsync_period_ms: u64,
    /// Requested scheduling class of the distributor thread.
    pub priority: ThreadPriority,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            soft_vsync_period_ms: DEFAULT_SOFT_VSYNC_PERIOD_MS,
            priority: ThreadPriority::Realtime,
        }
    }
}

impl DistributorConfig {
    /// Sets the software tick interval.
    #[must_use]
    pub const fn with_soft_vsync_period_ms(mut self, ms: u64) -> Self {
        self.soft_vsync_period_ms = ms;
        self
    }

    /// Disables software tick synthesis.
    #[must_use]
    pub const fn without_soft_vsync(self) -> Self {
        self.with_soft_vsync_period_ms(0)
    }

    /// Sets the scheduling class.
    #[must_use]
    pub const fn with_priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Software tick interval, or `None` when disabled.
    #[must_use]
    pub const fn soft_vsync_period(&self) -> Option<Duration> {
        if self.soft_vsync_period_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.soft_vsync_period_ms))
        }
    }
}

/// Top-level wiring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Phase offset of the internal composition source.
    pub rs_phase_offset_ns: i64,
    /// Phase offset of the application-facing source.
    pub app_phase_offset_ns: i64,
    /// Name of the internal distributor.
    pub rs_distributor_name: String,
    /// Name of the application distributor.
    pub app_distributor_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rs_phase_offset_ns: 0,
            app_phase_offset_ns: 0,
            rs_distributor_name: "rs".to_string(),
            app_distributor_name: "app".to_string(),
        }
    }
}

/// Simulated hardware source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Nominal refresh rate.
    pub refresh_rate_hz: u32,
    /// Maximum absolute jitter applied to each hardware timestamp.
    pub jitter_ns: i64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60,
            jitter_ns: 50_000,
        }
    }
}

impl DisplayConfig {
    /// Nominal period in nanoseconds.
    #[must_use]
    pub fn period_ns(&self) -> i64 {
        (NS_PER_SEC / i64::from(self.refresh_rate_hz.max(1))).max(1)
    }
}

/// Complete configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VsyncConfig {
    /// `[generator]`
    pub generator: GeneratorConfig,
    /// `[sampler]`
    pub sampler: SamplerConfig,
    /// `[distributor]`
    pub distributor: DistributorConfig,
    /// `[service]`
    pub service: ServiceConfig,
    /// `[display]`
    pub display: DisplayConfig,
}

impl VsyncConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generator.max_wakeup_delay_ns < 0 {
            return Err(ConfigError::Invalid(
                "generator.max_wakeup_delay_ns must be >= 0".to_string(),
            ));
        }
        if self.generator.fire_tolerance_ns < 0 {
            return Err(ConfigError::Invalid(
                "generator.fire_tolerance_ns must be >= 0".to_string(),
            ));
        }
        if self.sampler.error_threshold_ns2 <= 0 {
            return Err(ConfigError::Invalid(
                "sampler.error_threshold_ns2 must be > 0".to_string(),
            ));
        }
        if self.display.refresh_rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "display.refresh_rate_hz must be > 0".to_string(),
            ));
        }
        if i64::from(self.display.refresh_rate_hz) > NS_PER_SEC {
            return Err(ConfigError::Invalid(
                "display.refresh_rate_hz must leave a period of at least 1ns".to_string(),
            ));
        }
        if self.display.jitter_ns < 0 {
            return Err(ConfigError::Invalid(
                "display.jitter_ns must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Serializes back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = VsyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, VsyncConfig::default());
        assert_eq!(config.generator.max_wakeup_delay_ns, 1_500_000);
        assert_eq!(config.distributor.soft_vsync_period_ms, 16);
        assert_eq!(config.service.app_distributor_name, "app");
    }

    #[test]
    fn test_partial_sections() {
        let text = r#"
            [distributor]
            soft_vsync_period_ms = 0

            [service]
            app_phase_offset_ns = 1000000
        "#;
        let config = VsyncConfig::from_toml_str(text).unwrap();
        assert_eq!(config.distributor.soft_vsync_period(), None);
        assert_eq!(config.service.app_phase_offset_ns, 1_000_000);
        assert_eq!(config.service.rs_distributor_name, "rs");
        assert_eq!(config.generator, GeneratorConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = VsyncConfig::from_toml_str("[display]\nrefresh_rate_hz = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = VsyncConfig::from_toml_str("[sampler]\nerror_threshold_ns2 = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_sub_nanosecond_refresh_rejected() {
        let mut config = VsyncConfig::default();
        config.display.refresh_rate_hz = 2_000_000_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.display.period_ns(), 1);

        config.display.refresh_rate_hz = 1_000_000_000;
        assert!(config.validate().is_ok());
        assert_eq!(config.display.period_ns(), 1);
    }

    #[test]
    fn test_to_toml_reparses() {
        let config = VsyncConfig {
            display: DisplayConfig {
                refresh_rate_hz: 120,
                jitter_ns: 0,
            },
            ..VsyncConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(VsyncConfig::from_toml_str(&text).unwrap(), config);
        assert_eq!(config.display.period_ns(), 8_333_333);
    }

    #[test]
    fn test_load_missing_file() {
        let err = VsyncConfig::load("/nonexistent/metronome.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
