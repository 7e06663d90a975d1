//! Per-attempt launch inputs.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower bound applied to the configured launch timeout.
pub const MIN_LAUNCH_TIMEOUT: Duration = Duration::from_millis(3000);

/// Fixed pause between establishment retries.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Instances created longer ago than this are assumed to have finished booting.
pub const ALREADY_BOOTED_AFTER: Duration = Duration::from_secs(3 * 60);

/// How the administrative password is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Decrypt the password the cloud generated for the instance.
    #[default]
    DerivedPassword,
    /// Use the configured identity and password as-is.
    SuppliedPassword,
}

/// Which instance address is used to reach the management endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStrategy {
    #[default]
    PublicIp,
    PrivateIp,
    PublicDns,
    PrivateDns,
}

/// A password that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Plain-text value, for handing to the transport only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Immutable inputs of a single launch attempt.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Cloud instance identifier
    pub instance_id: String,
    /// Name used in progress messages
    pub display_name: String,
    /// Configured launch timeout; see [`LaunchContext::deadline`]
    pub launch_timeout: Duration,
    pub security: SecurityMode,
    /// Administrative identity
    pub remote_admin: String,
    /// Pre-supplied password for [`SecurityMode::SuppliedPassword`]
    pub admin_password: Option<Secret>,
    /// Request a secure transport from the remote management endpoint
    pub use_https: bool,
    /// Stabilization wait after the first successful probe
    pub boot_delay: Duration,
    /// Instance is expected to have been stopped and restarted; forces re-stabilization
    pub stop_on_terminate: bool,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    pub connection_strategy: ConnectionStrategy,
    /// Pause between establishment retries
    pub retry_interval: Duration,
    /// Remote working directory (defaults to the system temp directory)
    pub tmp_dir: Option<String>,
    /// Script run once per working directory before the agent is deployed
    pub init_script: Option<String>,
    /// Extra runtime options inserted verbatim into the launch command
    pub jvm_opts: Option<String>,
    /// Agent root directory passed as `-workDir`
    pub remote_fs: Option<String>,
    /// Interpreter used to run the agent payload
    pub java_path: String,
}

impl LaunchContext {
    /// Create a context with default settings for a freshly created instance.
    pub fn new(instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        Self {
            display_name: instance_id.clone(),
            instance_id,
            launch_timeout: Duration::ZERO,
            security: SecurityMode::default(),
            remote_admin: crate::credentials::CANONICAL_ADMIN.to_string(),
            admin_password: None,
            use_https: false,
            boot_delay: Duration::ZERO,
            stop_on_terminate: false,
            created_at: Utc::now(),
            connection_strategy: ConnectionStrategy::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            tmp_dir: None,
            init_script: None,
            jvm_opts: None,
            remote_fs: None,
            java_path: "java".to_string(),
        }
    }

    /// Effective establishment deadline: the configured timeout, floored at
    /// [`MIN_LAUNCH_TIMEOUT`].
    pub fn deadline(&self) -> Duration {
        self.launch_timeout.max(MIN_LAUNCH_TIMEOUT)
    }

    /// Whether the instance is old enough to skip stabilization at `now`.
    pub fn already_booted(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at)
            .to_std()
            .is_ok_and(|age| age > ALREADY_BOOTED_AFTER)
    }

    /// Init script, if configured and not blank.
    pub fn init_script(&self) -> Option<&str> {
        self.init_script
            .as_deref()
            .filter(|script| !script.trim().is_empty())
    }
}
