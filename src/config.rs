//! Orchestrator configuration.
//!
//! `Settings` is the configuration bag handed to the graph builder and the
//! dispatcher: reference data paths for the GATK steps, the poll period and
//! the worker-pool limits. Values destined for tool command lines are passed
//! through to the external scheduler as-is; invalid paths surface only at
//! execution time.

use std::time::Duration;

use thiserror::Error;

/// Name of the workflow this orchestrator dispatches.
pub const TARGET_WORKFLOW: &str = "NECVariantCalling";

/// Name of the upstream alignment workflow whose BAM output is consumed.
pub const UPSTREAM_WORKFLOW: &str = "NECAlignment";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for graph construction and dispatch.
#[derive(Debug, Clone)]
pub struct Settings {
    // Reference data handed to the GATK steps, unvalidated.
    /// Reference sequence FASTA path.
    pub reference_sequence: String,
    /// Interval list for the depth-of-coverage step.
    pub depth_of_coverage_interval_list: String,
    /// Interval list for the genotyping step.
    pub unified_genotyper_interval_list: String,
    /// dbSNP VCF for the genotyping step.
    pub unified_genotyper_dbsnp: String,
    /// GATK license key file.
    pub gatk_key: String,
    /// Site name stamped onto every job.
    pub site_name: String,

    // Dispatcher settings
    /// Poll period in minutes.
    pub period_minutes: u64,
    /// Steady-state worker-pool size.
    pub core_pool_size: usize,
    /// Upper bound on concurrently executing graphs.
    pub max_pool_size: usize,
    /// Submission attempts allowed before a run attempt is failed.
    pub max_submit_attempts: u32,
    /// Base delay for exponential submission backoff.
    pub retry_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reference_sequence: String::new(),
            depth_of_coverage_interval_list: String::new(),
            unified_genotyper_interval_list: String::new(),
            unified_genotyper_dbsnp: String::new(),
            gatk_key: String::new(),
            site_name: String::new(),
            period_minutes: 5,
            core_pool_size: 2,
            max_pool_size: 4,
            max_submit_attempts: 3,
            retry_backoff: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from the environment, falling back to defaults.
    ///
    /// Recognized variables mirror the configuration keys:
    /// `VARPIPE_REFERENCE_SEQUENCE`, `VARPIPE_DOC_INTERVAL_LIST`,
    /// `VARPIPE_UG_INTERVAL_LIST`, `VARPIPE_UG_DBSNP`, `VARPIPE_GATK_KEY`,
    /// `VARPIPE_SITE_NAME`, `VARPIPE_PERIOD`, `VARPIPE_CORE_POOL_SIZE`,
    /// `VARPIPE_MAX_POOL_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("VARPIPE_REFERENCE_SEQUENCE") {
            settings.reference_sequence = v;
        }
        if let Ok(v) = std::env::var("VARPIPE_DOC_INTERVAL_LIST") {
            settings.depth_of_coverage_interval_list = v;
        }
        if let Ok(v) = std::env::var("VARPIPE_UG_INTERVAL_LIST") {
            settings.unified_genotyper_interval_list = v;
        }
        if let Ok(v) = std::env::var("VARPIPE_UG_DBSNP") {
            settings.unified_genotyper_dbsnp = v;
        }
        if let Ok(v) = std::env::var("VARPIPE_GATK_KEY") {
            settings.gatk_key = v;
        }
        if let Ok(v) = std::env::var("VARPIPE_SITE_NAME") {
            settings.site_name = v;
        }
        if let Ok(v) = std::env::var("VARPIPE_PERIOD") {
            settings.period_minutes = parse_env("VARPIPE_PERIOD", &v)?;
        }
        if let Ok(v) = std::env::var("VARPIPE_CORE_POOL_SIZE") {
            settings.core_pool_size = parse_env("VARPIPE_CORE_POOL_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("VARPIPE_MAX_POOL_SIZE") {
            settings.max_pool_size = parse_env("VARPIPE_MAX_POOL_SIZE", &v)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Sets the poll period in minutes.
    pub fn with_period_minutes(mut self, minutes: u64) -> Self {
        self.period_minutes = minutes;
        self
    }

    /// Sets the worker-pool limits.
    pub fn with_pool_sizes(mut self, core: usize, max: usize) -> Self {
        self.core_pool_size = core;
        self.max_pool_size = max;
        self
    }

    /// Sets the submission retry policy.
    pub fn with_retry_policy(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_submit_attempts = max_attempts;
        self.retry_backoff = backoff;
        self
    }

    /// Sets the reference sequence path.
    pub fn with_reference_sequence(mut self, path: impl Into<String>) -> Self {
        self.reference_sequence = path.into();
        self
    }

    /// Sets the site name.
    pub fn with_site_name(mut self, site: impl Into<String>) -> Self {
        self.site_name = site.into();
        self
    }

    /// Poll period as a duration.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_minutes * 60)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "maxPoolSize must be at least 1".to_string(),
            ));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(ConfigError::ValidationFailed(format!(
                "corePoolSize ({}) must not exceed maxPoolSize ({})",
                self.core_pool_size, self.max_pool_size
            )));
        }
        if self.period_minutes == 0 {
            return Err(ConfigError::ValidationFailed(
                "period must be at least 1 minute".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}' is not a valid number"),
    })
}
