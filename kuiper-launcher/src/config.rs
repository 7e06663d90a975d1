//! Per-node launch settings.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ConnectionStrategy, LaunchContext, SecurityMode, Secret};
use crate::credentials::CANONICAL_ADMIN;

/// Launch settings as they appear in a configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LaunchSettings {
    /// Administrative user (forced to "Administrator" for derived passwords)
    #[serde(default = "default_remote_admin")]
    pub remote_admin: String,
    /// Password for supplied_password mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<Secret>,
    /// "derived_password" or "supplied_password"
    #[serde(default)]
    pub security: SecurityMode,
    #[serde(default)]
    pub use_https: bool,
    /// Launch timeout in seconds (floored at 3s)
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,
    /// Stabilization wait after the first successful probe, in seconds
    #[serde(default = "default_boot_delay")]
    pub boot_delay_secs: u64,
    /// Instance is stopped rather than terminated between uses
    #[serde(default)]
    pub stop_on_terminate: bool,
    #[serde(default)]
    pub connection_strategy: ConnectionStrategy,
    /// Pause between connection retries, in seconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Remote working directory (default: C:\Windows\Temp\)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<String>,
    /// Batch script run once before the first agent launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_script: Option<String>,
    /// Extra JVM options for the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_opts: Option<String>,
    /// Agent root directory on the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_fs: Option<String>,
    #[serde(default = "default_java_path")]
    pub java_path: String,
}

fn default_remote_admin() -> String {
    CANONICAL_ADMIN.to_string()
}

fn default_launch_timeout() -> u64 {
    600
}

fn default_boot_delay() -> u64 {
    60
}

fn default_retry_interval() -> u64 {
    10
}

fn default_java_path() -> String {
    "java".to_string()
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            remote_admin: default_remote_admin(),
            admin_password: None,
            security: SecurityMode::default(),
            use_https: false,
            launch_timeout_secs: default_launch_timeout(),
            boot_delay_secs: default_boot_delay(),
            stop_on_terminate: false,
            connection_strategy: ConnectionStrategy::default(),
            retry_interval_secs: default_retry_interval(),
            tmp_dir: None,
            init_script: None,
            jvm_opts: None,
            remote_fs: None,
            java_path: default_java_path(),
        }
    }
}

impl LaunchSettings {
    /// Build the context for one attempt against `instance_id`.
    pub fn context(
        &self,
        instance_id: &str,
        display_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> LaunchContext {
        let mut ctx = LaunchContext::new(instance_id);
        if let Some(name) = display_name {
            ctx.display_name = name.to_string();
        }
        ctx.launch_timeout = Duration::from_secs(self.launch_timeout_secs);
        ctx.security = self.security;
        ctx.remote_admin = self.remote_admin.clone();
        ctx.admin_password = self.admin_password.clone();
        ctx.use_https = self.use_https;
        ctx.boot_delay = Duration::from_secs(self.boot_delay_secs);
        ctx.stop_on_terminate = self.stop_on_terminate;
        ctx.created_at = created_at;
        ctx.connection_strategy = self.connection_strategy;
        ctx.retry_interval = Duration::from_secs(self.retry_interval_secs);
        ctx.tmp_dir = self.tmp_dir.clone();
        ctx.init_script = self.init_script.clone();
        ctx.jvm_opts = self.jvm_opts.clone();
        ctx.remote_fs = self.remote_fs.clone();
        ctx.java_path = self.java_path.clone();
        ctx
    }
}
