//! Connection establishment.
//!
//! Waits for an instance to become reachable within the launch deadline:
//! 1. Resolve the instance address (retry while unassigned)
//! 2. Resolve credentials (retry while the password is not generated yet)
//! 3. Open a session and probe it until the management service answers
//! 4. Wait for the service to stabilize on freshly booted instances and probe again
//!
//! Only the deadline is fatal. Probe errors look exactly like "not ready yet",
//! so a permanently wrong password surfaces as a timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::context::LaunchContext;
use crate::credentials::{CredentialResolver, Resolution};
use crate::error::Error;
use crate::instance::{InstanceDescriber, UNASSIGNED_ADDRESS};
use crate::progress::Progress;
use crate::transport::{RemoteSession, RemoteTransport, SessionTarget};

/// How far establishment got before the current retry.
#[derive(Debug)]
enum Connection<S> {
    /// No usable address yet.
    Unresolved,
    /// Address known, credentials still pending.
    AddressKnown(String),
    /// Session constructed; kept for every later retry.
    SessionOpen(S),
}

/// Measures elapsed time against the effective launch deadline.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn check(&self) -> Result<()> {
        let waited = self.started.elapsed();
        if waited > self.limit {
            return Err(Error::Timeout {
                waited_secs: waited.as_secs(),
            });
        }
        Ok(())
    }

    /// Time left before the deadline, zero once it has passed.
    fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }
}

/// Establishes a ready session for one launch attempt.
pub struct Establisher<'a, T: RemoteTransport> {
    ctx: &'a LaunchContext,
    transport: &'a T,
    describer: Arc<dyn InstanceDescriber>,
    credentials: CredentialResolver,
    progress: &'a Progress,
}

impl<'a, T: RemoteTransport> Establisher<'a, T> {
    pub fn new(
        ctx: &'a LaunchContext,
        transport: &'a T,
        describer: Arc<dyn InstanceDescriber>,
        credentials: CredentialResolver,
        progress: &'a Progress,
    ) -> Self {
        Self {
            ctx,
            transport,
            describer,
            credentials,
            progress,
        }
    }

    /// Wait until the management endpoint is reachable and stable.
    ///
    /// Fails with [`Error::Timeout`] once `ctx.deadline()` is exceeded. Fatal
    /// credential errors (decryption, missing supplied password) are returned as-is.
    pub async fn establish(&self) -> Result<T::Session> {
        let deadline = Deadline::start(self.ctx.deadline());

        self.progress.info(format!(
            "{} booted at {}",
            self.ctx.display_name, self.ctx.created_at
        ));
        let mut stabilized = self.ctx.already_booted(Utc::now());

        let mut session = self.open_session(&deadline).await?;

        loop {
            if let Err(e) = deadline.check() {
                session.close().await;
                return Err(e);
            }

            if self
                .confirm_ready(&mut session, &mut stabilized, &deadline)
                .await
            {
                self.progress
                    .info(format!("Connected to {}.", self.ctx.display_name));
                return Ok(session);
            }

            self.pause().await;
        }
    }

    /// Loop until an address and complete credentials are known.
    async fn open_session(&self, deadline: &Deadline) -> Result<T::Session> {
        let mut state = Connection::Unresolved;
        loop {
            deadline.check()?;

            state = match self.advance(state).await? {
                Connection::SessionOpen(session) => return Ok(session),
                pending => pending,
            };

            self.pause().await;
        }
    }

    /// One resolution try. The address is re-queried on every call.
    async fn advance(&self, state: Connection<T::Session>) -> Result<Connection<T::Session>> {
        let description = match self.describer.describe(&self.ctx.instance_id).await {
            Ok(description) => description,
            Err(e) => {
                self.progress
                    .info(format!("Unable to describe {}: {e}", self.ctx.instance_id));
                return Ok(Connection::Unresolved);
            }
        };

        let host = description.address(self.ctx.connection_strategy);
        if host == UNASSIGNED_ADDRESS {
            self.progress.info(format!(
                "Invalid host {UNASSIGNED_ADDRESS}, your host is most likely waiting for an ip address."
            ));
            return Ok(Connection::Unresolved);
        }

        if let Connection::AddressKnown(previous) = &state
            && previous != host
        {
            debug!("Address of {} changed from {} to {}", self.ctx.instance_id, previous, host);
        }

        let credentials = match self.credentials.resolve(self.ctx, self.progress).await? {
            Resolution::Ready(credentials) => credentials,
            Resolution::Pending => return Ok(Connection::AddressKnown(host.to_string())),
        };

        self.progress.info(format!(
            "Connecting to ({host}) as {}",
            credentials.username
        ));
        let session = self.transport.open(SessionTarget {
            host: host.to_string(),
            username: credentials.username,
            password: credentials.password,
            use_https: self.ctx.use_https,
        });
        Ok(Connection::SessionOpen(session))
    }

    /// Probe the session, stabilizing it first when required.
    async fn confirm_ready(
        &self,
        session: &mut T::Session,
        stabilized: &mut bool,
        deadline: &Deadline,
    ) -> bool {
        if !self.probe(session, deadline).await {
            self.progress.info(format!(
                "Waiting for the management service to come up. Sleeping {}s.",
                self.ctx.retry_interval.as_secs()
            ));
            return false;
        }

        if !*stabilized || self.ctx.stop_on_terminate {
            self.progress.info(format!(
                "Management service responded. Waiting for it to stabilize on {}",
                self.ctx.display_name
            ));
            tokio::time::sleep(self.ctx.boot_delay).await;
            *stabilized = true;
            self.progress.info(format!(
                "Management service should now be ok on {}",
                self.ctx.display_name
            ));

            if !self.probe(session, deadline).await {
                self.progress.info(format!(
                    "Management service not yet up. Sleeping {}s.",
                    self.ctx.retry_interval.as_secs()
                ));
                return false;
            }
        }

        true
    }

    /// One ping, cut off when the deadline passes.
    async fn probe(&self, session: &mut T::Session, deadline: &Deadline) -> bool {
        match tokio::time::timeout(deadline.remaining(), session.ping()).await {
            Ok(Ok(reachable)) => reachable,
            Ok(Err(e)) => {
                debug!("Probe of {} failed: {}", session.target().host, e);
                false
            }
            Err(_) => {
                debug!("Probe of {} still pending at the deadline", session.target().host);
                false
            }
        }
    }

    async fn pause(&self) {
        tokio::time::sleep(self.ctx.retry_interval).await;
    }
}
