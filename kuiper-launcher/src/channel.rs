//! Binding the agent's standard streams to the controller channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::Result;
use crate::error::Error;
use crate::progress::{LogSink, Progress};
use crate::transport::{RemoteProcess, RemoteReader, RemoteSession, RemoteWriter};

type TeardownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Close hook that terminates the agent process and closes its session.
///
/// Clones share one hook; it fires at most once no matter how many of them run.
#[derive(Clone)]
pub struct Teardown {
    action: Arc<Mutex<Option<TeardownFuture>>>,
}

impl Teardown {
    pub fn new<P: RemoteProcess, S: RemoteSession>(process: P, session: S) -> Self {
        Self {
            action: Arc::new(Mutex::new(Some(Box::pin(teardown(process, session))))),
        }
    }

    /// Fire the hook. Returns `false` if it had already fired.
    pub async fn run(&self) -> bool {
        let action = self.action.lock().await.take();
        match action {
            Some(action) => {
                action.await;
                true
            }
            None => false,
        }
    }

    pub async fn has_run(&self) -> bool {
        self.action.lock().await.is_none()
    }
}

async fn teardown<P: RemoteProcess, S: RemoteSession>(mut process: P, mut session: S) {
    debug!("Tearing down agent on {}", session.target().host);
    process.destroy().await;
    session.close().await;
}

/// Duplex byte stream to the agent: read its stdout, write its stdin.
pub struct AgentStreams {
    pub reader: RemoteReader,
    pub writer: RemoteWriter,
}

/// Controller-side channel abstraction.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Bind `streams` as a channel named `name`.
    ///
    /// `on_close` must be run when the channel closes, whichever end closed it.
    async fn bind(
        &self,
        name: &str,
        streams: AgentStreams,
        log: Arc<dyn LogSink>,
        on_close: Teardown,
    ) -> Result<()>;
}

/// Hand the agent process to the controller.
///
/// Ownership of `process` and `session` moves into the close hook. If binding
/// fails the hook is fired right away.
pub async fn wire_channel<P: RemoteProcess, S: RemoteSession>(
    mut process: P,
    session: S,
    name: &str,
    channels: &dyn ChannelFactory,
    progress: &Progress,
) -> Result<()> {
    let streams = match (process.take_stdout(), process.take_stdin()) {
        (Some(reader), Some(writer)) => AgentStreams { reader, writer },
        _ => {
            Teardown::new(process, session).run().await;
            return Err(Error::channel("agent process streams are not available"));
        }
    };

    let on_close = Teardown::new(process, session);
    if let Err(e) = channels
        .bind(name, streams, progress.sink(), on_close.clone())
        .await
    {
        on_close.run().await;
        return Err(e);
    }

    progress.info(format!("Agent channel established for {name}"));
    Ok(())
}
