//! Remote management transport seam.
//!
//! The launcher drives the remote host exclusively through these traits; the
//! wire protocol lives in the implementation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::context::Secret;
use crate::error::TransportError;

/// Output stream of a remote process.
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Input stream of a remote process.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Everything needed to open a session to the management endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub username: String,
    pub password: Secret,
    pub use_https: bool,
}

/// Factory for sessions.
pub trait RemoteTransport: Send + Sync {
    type Session: RemoteSession;

    /// Build a session handle. No network traffic happens until the first call on it.
    fn open(&self, target: SessionTarget) -> Self::Session;
}

/// An authenticated handle to the remote management endpoint.
#[async_trait]
pub trait RemoteSession: Send + 'static {
    type Process: RemoteProcess;

    fn target(&self) -> &SessionTarget;

    /// Whether the endpoint currently accepts commands.
    async fn ping(&mut self) -> Result<bool, TransportError>;

    /// Start `command`. `timeout` bounds the transport's own bookkeeping for the
    /// request, not the lifetime of the started process.
    async fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<Self::Process, TransportError>;

    /// Write `contents` to `path`, replacing any existing file.
    async fn put_file(&mut self, path: &str, contents: &[u8]) -> Result<(), TransportError>;

    async fn exists(&mut self, path: &str) -> Result<bool, TransportError>;

    /// Close the session. Calling it again has no effect.
    ///
    /// Closing may cut the streams of processes started on this session,
    /// including an agent already handed to a channel. Once the channel is
    /// bound, only its teardown closes the session.
    async fn close(&mut self);
}

/// A process started through [`RemoteSession::execute`].
#[async_trait]
pub trait RemoteProcess: Send + 'static {
    /// Take the stdout stream. Returns `None` once taken.
    fn take_stdout(&mut self) -> Option<RemoteReader>;

    /// Take the stdin stream. Returns `None` once taken.
    fn take_stdin(&mut self) -> Option<RemoteWriter>;

    /// Wait for the process to exit and return its exit code.
    async fn wait(&mut self) -> Result<u32, TransportError>;

    /// Terminate the process.
    async fn destroy(&mut self);
}
