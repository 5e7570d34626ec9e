use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gating::totp::SUPPORTED_DIGITS;
use crate::gating::TotpParams;
use crate::workflow::types::StageLabels;

/// Main configuration structure for Stagegate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageGateConfig {
    /// Stage sequence and completion policy
    pub workflow: WorkflowConfig,
    /// Signer verification settings
    pub gating: GatingConfig,
    /// File-backed storage locations
    pub storage: StorageConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishPolicy {
    /// `finish` marks the record completed
    Complete,
    /// `finish` marks the record finishing; completion is confirmed separately
    MarkFinishing,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Ordered stage labels shown by the shell
    pub stage_labels: StageLabels,
    pub finish_policy: FinishPolicy,
    /// Also require the final signer to verify before finishing
    pub gate_finish: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatingConfig {
    /// Permit a caller-confirmed override when a signer cannot be resolved
    pub allow_identity_override: bool,
    pub totp_digits: u32,
    pub totp_step_seconds: u64,
    pub totp_skew_steps: u64,
}

impl GatingConfig {
    pub fn totp_params(&self) -> TotpParams {
        TotpParams {
            digits: self.totp_digits,
            step_seconds: self.totp_step_seconds,
            skew_steps: self.totp_skew_steps,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root for record files and sequence counters
    pub data_dir: PathBuf,
    /// TOML file with `[[identities]]` entries
    pub directory_file: PathBuf,
}

impl StorageConfig {
    pub fn sequence_file(&self) -> PathBuf {
        self.data_dir.join("sequences.json")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or EnvFilter directive
    pub log_level: String,
    /// Emit JSON log lines
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for StageGateConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig {
                stage_labels: StageLabels::default(),
                finish_policy: FinishPolicy::Complete,
                gate_finish: false,
            },
            gating: GatingConfig {
                allow_identity_override: true,
                totp_digits: 6,
                totp_step_seconds: 30,
                totp_skew_steps: 1,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from(".stagegate"),
                directory_file: PathBuf::from(".stagegate/directory.toml"),
            },
            observability: ObservabilityConfig {
                log_level: "warn".to_string(),
                json: false,
            },
            database: None,
        }
    }
}

impl StageGateConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (stagegate.toml, .stagegate-rc)
    /// 3. Environment variables (prefixed with STAGEGATE_, sections split by `__`)
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&StageGateConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if Path::new("stagegate.toml").exists() {
            builder = builder.add_source(File::with_name("stagegate"));
        }

        if Path::new(".stagegate-rc").exists() {
            builder = builder.add_source(File::with_name(".stagegate-rc").format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("STAGEGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: StageGateConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_DIGITS.contains(&self.gating.totp_digits) {
            bail!(
                "gating.totp_digits must be between {} and {}, got {}",
                SUPPORTED_DIGITS.start(),
                SUPPORTED_DIGITS.end(),
                self.gating.totp_digits
            );
        }
        if self.gating.totp_step_seconds == 0 {
            bail!("gating.totp_step_seconds must be positive");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StageGateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gating.totp_params(), TotpParams::default());
        assert_eq!(config.workflow.stage_labels.iter().count(), 7);
    }

    #[test]
    fn test_toml_round_trip_keeps_labels() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stagegate.toml");
        let mut config = StageGateConfig::default();
        config.workflow.finish_policy = FinishPolicy::MarkFinishing;
        config.save_to_file(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: StageGateConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.workflow.finish_policy, FinishPolicy::MarkFinishing);
        assert_eq!(parsed.workflow.stage_labels, StageLabels::default());
    }

    #[test]
    fn test_wrong_label_count_is_rejected() {
        let raw = toml::to_string_pretty(&StageGateConfig::default())
            .unwrap()
            .replace("\"Ratification\",", "")
            .replace("\"Ratification\"", "");
        assert!(toml::from_str::<StageGateConfig>(&raw).is_err());
    }

    #[test]
    fn test_bad_totp_digits_fail_validation() {
        let mut config = StageGateConfig::default();
        config.gating.totp_digits = 4;
        assert!(config.validate().is_err());
    }
}
