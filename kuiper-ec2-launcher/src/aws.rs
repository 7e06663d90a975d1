//! EC2 access through the AWS CLI and password decryption through OpenSSL.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use kuiper_launcher::{
    CloudError, CredentialSource, InstanceDescriber, InstanceDescription, PasswordDecryptor, Secret,
};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::AwsConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

/// Fields of an EC2 instance the launcher cares about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2Instance {
    pub instance_id: String,
    #[serde(default)]
    pub public_ip_address: Option<String>,
    #[serde(default)]
    pub private_ip_address: Option<String>,
    #[serde(default)]
    pub public_dns_name: Option<String>,
    #[serde(default)]
    pub private_dns_name: Option<String>,
    #[serde(default)]
    pub launch_time: Option<DateTime<Utc>>,
}

impl From<Ec2Instance> for InstanceDescription {
    fn from(instance: Ec2Instance) -> Self {
        Self {
            instance_id: instance.instance_id,
            public_ip: instance.public_ip_address,
            private_ip: instance.private_ip_address,
            public_dns: instance.public_dns_name,
            private_dns: instance.private_dns_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PasswordDataOutput {
    #[serde(default)]
    password_data: String,
}

/// Wrapper around the `aws ec2` CLI.
#[derive(Debug, Clone)]
pub struct AwsCli {
    config: AwsConfig,
}

impl AwsCli {
    pub fn new(config: AwsConfig) -> Self {
        Self { config }
    }

    /// Run `aws ec2 <args..> --output json` and return stdout.
    async fn ec2(&self, args: &[&str]) -> Result<Vec<u8>, CloudError> {
        let mut cmd = Command::new(&self.config.cli);
        cmd.arg("ec2").args(args).args(["--output", "json"]);
        if let Some(ref region) = self.config.region {
            cmd.arg("--region").arg(region);
        }
        if let Some(ref profile) = self.config.profile {
            cmd.arg("--profile").arg(profile);
        }
        trace!("aws ec2 {}", args.join(" "));

        let output = cmd.output().await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CloudError::Api(format!(
                "aws ec2 {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )))
        }
    }

    /// Describe a single instance.
    pub async fn instance(&self, instance_id: &str) -> Result<Ec2Instance, CloudError> {
        let stdout = self
            .ec2(&["describe-instances", "--instance-ids", instance_id])
            .await?;
        parse_instance(&stdout, instance_id)
    }
}

fn parse_instance(stdout: &[u8], instance_id: &str) -> Result<Ec2Instance, CloudError> {
    let output: DescribeInstancesOutput = serde_json::from_slice(stdout)
        .map_err(|e| CloudError::Api(format!("invalid describe-instances output: {e}")))?;
    output
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .find(|i| i.instance_id == instance_id)
        .ok_or_else(|| CloudError::Api(format!("instance {instance_id} not found")))
}

fn parse_password_data(stdout: &[u8]) -> Result<Option<String>, CloudError> {
    let output: PasswordDataOutput = serde_json::from_slice(stdout)
        .map_err(|e| CloudError::Api(format!("invalid get-password-data output: {e}")))?;
    let data = output.password_data.trim();
    if data.is_empty() {
        Ok(None)
    } else {
        Ok(Some(data.to_string()))
    }
}

#[async_trait]
impl InstanceDescriber for AwsCli {
    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription, CloudError> {
        Ok(self.instance(instance_id).await?.into())
    }
}

#[async_trait]
impl CredentialSource for AwsCli {
    async fn encrypted_password(&self, instance_id: &str) -> Result<Option<String>, CloudError> {
        let stdout = self
            .ec2(&["get-password-data", "--instance-id", instance_id])
            .await?;
        parse_password_data(&stdout)
    }
}

/// Decrypts EC2 password data with the key-pair private key via `openssl pkeyutl`.
#[derive(Debug, Clone)]
pub struct OpensslDecryptor {
    private_key: PathBuf,
}

impl OpensslDecryptor {
    pub fn new(private_key: PathBuf) -> Self {
        Self { private_key }
    }
}

#[async_trait]
impl PasswordDecryptor for OpensslDecryptor {
    async fn decrypt(&self, material: &str) -> Result<Secret, CloudError> {
        let encrypted = BASE64
            .decode(material.trim())
            .map_err(|e| CloudError::Decrypt(format!("password data is not base64: {e}")))?;

        let mut child = Command::new("openssl")
            .arg("pkeyutl")
            .arg("-decrypt")
            .arg("-inkey")
            .arg(&self.private_key)
            .args(["-pkeyopt", "rsa_padding_mode:pkcs1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&encrypted).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::Decrypt(stderr.trim().to_string()));
        }

        let password = String::from_utf8(output.stdout)
            .map_err(|_| CloudError::Decrypt("decrypted password is not UTF-8".to_string()))?;
        debug!("Decrypted administrator password ({} chars)", password.len());
        Ok(Secret::new(password))
    }
}
