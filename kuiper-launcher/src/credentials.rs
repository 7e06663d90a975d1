//! Administrative credential resolution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::context::{LaunchContext, SecurityMode, Secret};
use crate::error::{CloudError, Error};
use crate::progress::Progress;

/// Identity that derived passwords belong to.
pub const CANONICAL_ADMIN: &str = "Administrator";

/// Source of the encrypted password material the cloud generates for an instance.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `Ok(None)` while the material has not been generated yet.
    async fn encrypted_password(&self, instance_id: &str) -> Result<Option<String>, CloudError>;
}

/// Decrypts password material with the key pair the instance was launched with.
#[async_trait]
pub trait PasswordDecryptor: Send + Sync {
    async fn decrypt(&self, material: &str) -> Result<Secret, CloudError>;
}

/// A complete identity/secret pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
}

/// Result of a single resolution try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(Credentials),
    /// Not available yet; try again after the retry interval.
    Pending,
}

/// Resolves credentials according to the context's [`SecurityMode`].
#[derive(Clone)]
pub struct CredentialResolver {
    source: Arc<dyn CredentialSource>,
    decryptor: Arc<dyn PasswordDecryptor>,
}

impl CredentialResolver {
    pub fn new(source: Arc<dyn CredentialSource>, decryptor: Arc<dyn PasswordDecryptor>) -> Self {
        Self { source, decryptor }
    }

    /// Resolve credentials for `ctx`.
    ///
    /// Retrieval failures and empty material are reported as [`Resolution::Pending`].
    /// A decryption failure is fatal: the key will not start matching later.
    pub async fn resolve(&self, ctx: &LaunchContext, progress: &Progress) -> Result<Resolution> {
        match ctx.security {
            SecurityMode::SuppliedPassword => {
                let password = ctx.admin_password.clone().ok_or_else(|| {
                    Error::config("supplied_password mode requires admin_password to be set")
                })?;
                Ok(Resolution::Ready(Credentials {
                    username: ctx.remote_admin.clone(),
                    password,
                }))
            }
            SecurityMode::DerivedPassword => self.derive(ctx, progress).await,
        }
    }

    async fn derive(&self, ctx: &LaunchContext, progress: &Progress) -> Result<Resolution> {
        let material = match self.source.encrypted_password(&ctx.instance_id).await {
            Ok(Some(material)) if !material.trim().is_empty() => material,
            Ok(_) => {
                progress.info(format!(
                    "Waiting for password to be available. Sleeping {}s.",
                    ctx.retry_interval.as_secs()
                ));
                return Ok(Resolution::Pending);
            }
            Err(e) => {
                progress.info(format!("Unexpected error fetching password data: {e}"));
                return Ok(Resolution::Pending);
            }
        };

        let password = self.decryptor.decrypt(material.trim()).await?;

        if ctx.remote_admin != CANONICAL_ADMIN {
            progress.warn(format!(
                "For password retrieval remote admin must be {CANONICAL_ADMIN}, ignoring user provided value"
            ));
        }

        Ok(Resolution::Ready(Credentials {
            username: CANONICAL_ADMIN.to_string(),
            password,
        }))
    }
}
