//! Controller channel over the launcher's own stdin/stdout.
//!
//! Stdout carries agent traffic, so all human-readable output goes to stderr.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use kuiper_launcher::{AgentStreams, ChannelFactory, LogSink, Teardown};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Log sink writing progress lines to stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn line(&self, line: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
    }
}

/// Binds agent channels to stdin/stdout.
#[derive(Default)]
pub struct StdioChannelFactory {
    teardowns: Mutex<Vec<Teardown>>,
    closed: Arc<Notify>,
}

impl StdioChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a bound channel has closed and its teardown ran.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    /// Close every bound channel from this side.
    pub async fn shutdown(&self) {
        let teardowns = std::mem::take(&mut *self.lock_teardowns());
        for teardown in teardowns {
            teardown.run().await;
        }
    }

    fn register(&self, teardown: Teardown) {
        self.lock_teardowns().push(teardown);
    }

    fn lock_teardowns(&self) -> MutexGuard<'_, Vec<Teardown>> {
        self.teardowns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ChannelFactory for StdioChannelFactory {
    async fn bind(
        &self,
        name: &str,
        streams: AgentStreams,
        log: Arc<dyn LogSink>,
        on_close: Teardown,
    ) -> kuiper_launcher::Result<()> {
        self.register(on_close.clone());
        splice(
            name.to_string(),
            streams,
            tokio::io::stdin(),
            tokio::io::stdout(),
            log,
            on_close,
            self.closed.clone(),
        );
        Ok(())
    }
}

/// Copy agent stdout to `local_out` and `local_in` to agent stdin. When either
/// direction ends the teardown runs and `closed` is notified.
fn splice<I, O>(
    name: String,
    streams: AgentStreams,
    mut local_in: I,
    mut local_out: O,
    log: Arc<dyn LogSink>,
    on_close: Teardown,
    closed: Arc<Notify>,
) where
    I: AsyncRead + Send + Unpin + 'static,
    O: AsyncWrite + Send + Unpin + 'static,
{
    let AgentStreams {
        mut reader,
        mut writer,
    } = streams;

    tokio::spawn(async move {
        let outbound = async {
            let copied = tokio::io::copy(&mut reader, &mut local_out).await;
            let _ = local_out.flush().await;
            ("agent output", copied)
        };
        let inbound = async {
            let copied = tokio::io::copy(&mut local_in, &mut writer).await;
            let _ = writer.shutdown().await;
            ("controller input", copied)
        };

        let (direction, copied) = tokio::select! {
            done = outbound => done,
            done = inbound => done,
        };
        match copied {
            Ok(bytes) => debug!("{} of {} ended after {} bytes", direction, name, bytes),
            Err(e) => debug!("{} of {} failed: {}", direction, name, e),
        }

        if on_close.run().await {
            log.line(&format!("Channel to {name} closed"));
            info!("Channel to {} closed, agent terminated", name);
        }
        closed.notify_one();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use kuiper_launcher::transport::{RemoteReader, RemoteWriter};
    use kuiper_launcher::{RemoteProcess, RemoteSession, SessionTarget, Secret, TransportError};
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct Counters {
        destroyed: AtomicUsize,
        closed: AtomicUsize,
    }

    struct Process(Arc<Counters>);

    #[async_trait]
    impl RemoteProcess for Process {
        fn take_stdout(&mut self) -> Option<RemoteReader> {
            None
        }

        fn take_stdin(&mut self) -> Option<RemoteWriter> {
            None
        }

        async fn wait(&mut self) -> Result<u32, TransportError> {
            Ok(0)
        }

        async fn destroy(&mut self) {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Session(SessionTarget, Arc<Counters>);

    #[async_trait]
    impl RemoteSession for Session {
        type Process = Process;

        fn target(&self) -> &SessionTarget {
            &self.0
        }

        async fn ping(&mut self) -> Result<bool, TransportError> {
            Ok(true)
        }

        async fn execute(
            &mut self,
            _command: &str,
            _timeout: Option<std::time::Duration>,
        ) -> Result<Process, TransportError> {
            Ok(Process(self.1.clone()))
        }

        async fn put_file(&mut self, _path: &str, _contents: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn exists(&mut self, _path: &str) -> Result<bool, TransportError> {
            Ok(false)
        }

        async fn close(&mut self) {
            self.1.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn teardown(counters: &Arc<Counters>) -> Teardown {
        let target = SessionTarget {
            host: "10.0.0.5".to_string(),
            username: "Administrator".to_string(),
            password: Secret::new("hunter2"),
            use_https: false,
        };
        Teardown::new(
            Process(counters.clone()),
            Session(target, counters.clone()),
        )
    }

    #[tokio::test]
    async fn test_agent_exit_runs_teardown_once() {
        let counters = Arc::new(Counters::default());
        let on_close = teardown(&counters);
        let closed = Arc::new(Notify::new());

        let streams = AgentStreams {
            reader: Box::new(&b"agent hello"[..]),
            writer: Box::new(tokio::io::sink()),
        };
        let (local_in, _controller) = tokio::io::duplex(64);
        let (local_out, mut captured) = tokio::io::duplex(64);

        splice(
            "win-builder-1".to_string(),
            streams,
            local_in,
            local_out,
            Arc::new(StderrSink),
            on_close.clone(),
            closed.clone(),
        );
        closed.notified().await;

        let mut output = Vec::new();
        captured.read_to_end(&mut output).await.expect("read");
        assert_eq!(output, b"agent hello");
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        assert!(!on_close.run().await);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_bound_channels() {
        let counters = Arc::new(Counters::default());
        let factory = StdioChannelFactory::new();
        factory.register(teardown(&counters));

        factory.shutdown().await;
        factory.shutdown().await;

        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }
}
