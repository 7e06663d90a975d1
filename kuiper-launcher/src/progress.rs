//! Progress reporting to the launch log sink.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

/// Append-only line writer for human-readable launch progress.
///
/// May be shared by concurrent attempts; each attempt only appends.
pub trait LogSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Writes every progress event to the sink and as a diagnostic `tracing` record.
#[derive(Clone)]
pub struct Progress {
    sink: Arc<dyn LogSink>,
}

impl Progress {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        self.sink.clone()
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.sink.line(msg);
        debug!("{}", msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.sink.line(&format!("WARNING: {msg}"));
        warn!("{}", msg);
    }

    /// Copy `output` to the sink line by line until it ends.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than failing the copy.
    pub async fn pipe<R>(&self, output: R) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(output);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            self.sink.line(line.trim_end_matches(['\r', '\n']));
        }
    }
}
