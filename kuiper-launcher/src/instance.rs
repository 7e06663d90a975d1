//! Instance description and address selection.

use async_trait::async_trait;

use crate::context::ConnectionStrategy;
use crate::error::CloudError;

/// Address reported for instances that have not been assigned one yet.
pub const UNASSIGNED_ADDRESS: &str = "0.0.0.0";

/// Network-relevant subset of a cloud instance description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub public_dns: Option<String>,
    pub private_dns: Option<String>,
}

impl InstanceDescription {
    /// Address to connect to under `strategy`, or [`UNASSIGNED_ADDRESS`].
    pub fn address(&self, strategy: ConnectionStrategy) -> &str {
        let candidate = match strategy {
            ConnectionStrategy::PublicIp => &self.public_ip,
            ConnectionStrategy::PrivateIp => &self.private_ip,
            ConnectionStrategy::PublicDns => &self.public_dns,
            ConnectionStrategy::PrivateDns => &self.private_dns,
        };
        candidate
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .unwrap_or(UNASSIGNED_ADDRESS)
    }
}

/// Instance descriptor provider.
#[async_trait]
pub trait InstanceDescriber: Send + Sync {
    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription, CloudError>;
}
