//! The launch attempt: establish, bootstrap, deploy, wire.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::Result;
use crate::bootstrap::bootstrap;
use crate::channel::{ChannelFactory, wire_channel};
use crate::context::LaunchContext;
use crate::credentials::{CredentialResolver, CredentialSource, PasswordDecryptor};
use crate::deploy::{PayloadProvider, deploy};
use crate::error::Error;
use crate::establish::Establisher;
use crate::instance::InstanceDescriber;
use crate::progress::{LogSink, Progress};
use crate::transport::{RemoteSession, RemoteTransport};

/// Final result of one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The agent is running and bound to the controller channel.
    ChannelEstablished,
    /// The management endpoint never became ready before the deadline.
    TimedOut { waited_secs: u64 },
    /// A stage failed; the reason has been logged.
    Aborted(String),
}

impl Outcome {
    pub fn is_established(&self) -> bool {
        matches!(self, Outcome::ChannelEstablished)
    }
}

/// External collaborators shared by launch attempts.
#[derive(Clone)]
pub struct Collaborators {
    pub describer: Arc<dyn InstanceDescriber>,
    pub credentials: Arc<dyn CredentialSource>,
    pub decryptor: Arc<dyn PasswordDecryptor>,
    pub payloads: Arc<dyn PayloadProvider>,
    pub channels: Arc<dyn ChannelFactory>,
    pub log: Arc<dyn LogSink>,
}

/// Runs launch attempts over a remote transport.
///
/// Attempts share no mutable state; each owns its session.
pub struct Launcher<T: RemoteTransport> {
    transport: T,
    collaborators: Collaborators,
}

impl<T: RemoteTransport> Launcher<T> {
    pub fn new(transport: T, collaborators: Collaborators) -> Self {
        Self {
            transport,
            collaborators,
        }
    }

    /// Run one attempt to completion.
    ///
    /// Every failure is logged and turned into an [`Outcome`]. The session is
    /// closed on every failure path; on success it belongs to the channel's
    /// close hook.
    pub async fn launch(&self, ctx: &LaunchContext) -> Outcome {
        let progress = Progress::new(self.collaborators.log.clone());
        info!("Launching agent on {} ({})", ctx.display_name, ctx.instance_id);

        let resolver = CredentialResolver::new(
            self.collaborators.credentials.clone(),
            self.collaborators.decryptor.clone(),
        );
        let establisher = Establisher::new(
            ctx,
            &self.transport,
            self.collaborators.describer.clone(),
            resolver,
            &progress,
        );

        let mut session = match establisher.establish().await {
            Ok(session) => session,
            Err(Error::Timeout { waited_secs }) => {
                let e = Error::Timeout { waited_secs };
                progress.info(e.to_string());
                warn!("{}: {}", ctx.instance_id, e);
                return Outcome::TimedOut { waited_secs };
            }
            Err(e) => return abort(&progress, ctx, e),
        };

        let process = match self.provision(&mut session, ctx, &progress).await {
            Ok(process) => process,
            Err(e) => {
                session.close().await;
                return abort(&progress, ctx, e);
            }
        };

        match wire_channel(
            process,
            session,
            &ctx.display_name,
            self.collaborators.channels.as_ref(),
            &progress,
        )
        .await
        {
            Ok(()) => {
                info!("Agent on {} connected", ctx.instance_id);
                Outcome::ChannelEstablished
            }
            Err(e) => abort(&progress, ctx, e),
        }
    }

    /// Bootstrap the instance and start the agent.
    async fn provision(
        &self,
        session: &mut T::Session,
        ctx: &LaunchContext,
        progress: &Progress,
    ) -> Result<<T::Session as RemoteSession>::Process> {
        let state = bootstrap(session, ctx, progress).await?;
        debug!(
            "Bootstrapped {} in {}: {:?}",
            ctx.instance_id,
            state.work_dir.as_str(),
            state.initialization
        );
        deploy(
            session,
            ctx,
            &state.work_dir,
            self.collaborators.payloads.as_ref(),
            progress,
        )
        .await
    }
}

fn abort(progress: &Progress, ctx: &LaunchContext, e: Error) -> Outcome {
    match &e {
        // Already reported with its exit status by the failing stage
        Error::CommandFailed { .. } => {
            warn!("Launch on {} aborted: {}", ctx.instance_id, e);
        }
        _ => {
            progress.info(format!("Launch failed: {e}"));
            error!(error = ?e, "Launch on {} failed", ctx.instance_id);
        }
    }
    Outcome::Aborted(e.to_string())
}
