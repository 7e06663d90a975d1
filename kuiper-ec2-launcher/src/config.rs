//! Configuration for the EC2 launcher.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use kuiper_launcher::{LaunchSettings, SecurityMode};

use crate::error::{Error, Result};

/// Main configuration structure loaded from TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// AWS CLI settings
    #[serde(default)]
    pub aws: AwsConfig,
    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshConfig,
    /// Agent payload settings
    pub agent: AgentConfig,
    /// Per-node launch settings
    #[serde(default)]
    pub launch: LaunchSettings,
}

/// AWS CLI configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AwsConfig {
    /// Region passed as `--region` (CLI default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Named profile passed as `--profile`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Key-pair private key (PEM) used to decrypt the administrator password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    /// Path to the `aws` executable
    #[serde(default = "default_aws_cli")]
    pub cli: String,
}

fn default_aws_cli() -> String {
    "aws".to_string()
}

/// SSH transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    /// SSH port on the instance
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Connection timeout in seconds
    #[serde(default = "default_ssh_timeout")]
    pub timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u64 {
    30
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            timeout_secs: default_ssh_timeout(),
        }
    }
}

/// Agent payload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Local path of the agent payload uploaded to each instance
    pub payload_path: PathBuf,
}

impl Config {
    /// Configuration with every optional section at its default and the
    /// required fields left empty.
    pub fn template() -> Self {
        Self {
            aws: AwsConfig::default(),
            ssh: SshConfig::default(),
            agent: AgentConfig {
                payload_path: PathBuf::new(),
            },
            launch: LaunchSettings::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.agent.payload_path = expand_tilde(&config.agent.payload_path);
        if let Some(ref key_path) = config.aws.private_key {
            config.aws.private_key = Some(expand_tilde(key_path));
        }

        let errors = config.missing_fields();
        if !errors.is_empty() {
            let error_msg = format!(
                "Configuration incomplete\n\nPlease edit {} and set:\n  - {}",
                path.display(),
                errors.join("\n  - ")
            );
            return Err(Error::Config(error_msg));
        }

        Ok(config)
    }

    /// Fields required by the configured security mode that are unset.
    fn missing_fields(&self) -> Vec<&'static str> {
        let mut errors = Vec::new();

        if self.agent.payload_path.as_os_str().is_empty() {
            errors.push("agent.payload_path: Local path of the agent payload (e.g., \"~/agent.jar\")");
        }

        match self.launch.security {
            SecurityMode::DerivedPassword => {
                if self.aws.private_key.is_none() {
                    errors.push(
                        "aws.private_key: Key-pair private key used to decrypt the administrator password",
                    );
                }
            }
            SecurityMode::SuppliedPassword => {
                if self.launch.admin_password.is_none() {
                    errors.push("launch.admin_password: Password for launch.remote_admin");
                }
            }
        }

        errors
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Get the default configuration file path.
    ///
    /// - macOS: `~/Library/Application Support/kuiper-ec2-launcher/config.toml`
    /// - Linux: `~/.config/kuiper-ec2-launcher/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kuiper-ec2-launcher")
            .join("config.toml")
    }

    /// Get the default data directory.
    ///
    /// - macOS: `~/Library/Application Support/kuiper-ec2-launcher/`
    /// - Linux: `~/.local/share/kuiper-ec2-launcher/`
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kuiper-ec2-launcher")
    }
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str()
        && let Some(rest) = path_str.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}
