//! SSH transport to Windows instances running OpenSSH.
//!
//! Commands run in the server's default shell (`cmd.exe`). Connections are
//! opened on first use, so a session can be created before the instance is
//! reachable and pinged until it is.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use kuiper_launcher::shell::{escape_powershell, powershell_invocation, quote_windows_argument};
use kuiper_launcher::transport::{RemoteReader, RemoteWriter};
use kuiper_launcher::{RemoteProcess, RemoteSession, RemoteTransport, SessionTarget, TransportError};
use russh::client::{self, Config, Handle, Handler, Msg};
use russh::keys::ssh_key::PublicKey;
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::SshConfig;

/// Buffer size of the local pipes attached to a remote process.
const PIPE_BUFFER: usize = 64 * 1024;

/// Bytes per base64 line streamed by [`SshSession::put_file`].
const UPLOAD_CHUNK: usize = 48 * 1024;

/// Client handler for russh.
struct ClientHandler;

impl Handler for ClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        // Instances are ephemeral and their host keys unknown in advance
        async { Ok(true) }
    }
}

/// Opens SSH sessions with password authentication.
#[derive(Debug, Clone)]
pub struct SshTransport {
    port: u16,
    connect_timeout: Duration,
}

impl SshTransport {
    pub fn from_config(config: &SshConfig) -> Self {
        Self {
            port: config.port,
            connect_timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl RemoteTransport for SshTransport {
    type Session = SshSession;

    fn open(&self, target: SessionTarget) -> SshSession {
        if target.use_https {
            debug!("HTTPS requested for {}; SSH is always encrypted", target.host);
        }
        SshSession {
            target,
            port: self.port,
            connect_timeout: self.connect_timeout,
            handle: None,
            closed: false,
        }
    }
}

/// A lazily connected SSH session.
pub struct SshSession {
    target: SessionTarget,
    port: u16,
    connect_timeout: Duration,
    handle: Option<Handle<ClientHandler>>,
    closed: bool,
}

impl SshSession {
    /// Connected handle, connecting and authenticating first if needed.
    async fn handle(&mut self) -> Result<&Handle<ClientHandler>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.handle.as_ref().is_some_and(|h| h.is_closed()) {
            debug!("SSH connection to {} dropped, reconnecting", self.target.host);
            self.handle = None;
        }
        if self.handle.is_none() {
            self.handle = Some(self.connect().await?);
        }
        self.handle.as_ref().ok_or(TransportError::Closed)
    }

    async fn connect(&self) -> Result<Handle<ClientHandler>, TransportError> {
        let addr = (self.target.host.as_str(), self.port);
        debug!("Connecting to SSH at {}:{}", self.target.host, self.port);

        let connect = client::connect(Arc::new(Config::default()), addr, ClientHandler);
        let mut handle = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            Err(_) => {
                return Err(TransportError::Timeout(format!(
                    "connecting to {}",
                    self.target.host
                )));
            }
        };

        let auth = handle.authenticate_password(&self.target.username, self.target.password.expose());
        let auth = tokio::time::timeout(self.connect_timeout, auth)
            .await
            .map_err(|_| {
                TransportError::Timeout(format!("authenticating to {}", self.target.host))
            })?
            .map_err(|e| TransportError::Auth(e.to_string()))?;
        if !auth.success() {
            return Err(TransportError::Auth(format!(
                "password rejected for {}",
                self.target.username
            )));
        }

        debug!("SSH authentication successful on {}", self.target.host);
        Ok(handle)
    }

    /// Run `command` to completion and return its exit code.
    async fn run(&mut self, command: &str) -> Result<u32, TransportError> {
        let mut process = self.execute(command, None).await?;
        process.wait().await
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    type Process = SshProcess;

    fn target(&self) -> &SessionTarget {
        &self.target
    }

    async fn ping(&mut self) -> Result<bool, TransportError> {
        let limit = self.connect_timeout;
        let result = match tokio::time::timeout(limit, self.run("exit 0")).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "no answer from {} within {}s",
                self.target.host,
                limit.as_secs()
            ))),
        };
        if result.is_err() {
            // Next ping starts from a fresh connection
            self.handle = None;
        }
        Ok(result? == 0)
    }

    async fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<SshProcess, TransportError> {
        let handle = self.handle().await?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Command(format!("failed to open channel: {e}")))?;

        trace!("SSH exec: {}", command);
        let exec = channel.exec(true, command);
        let exec = match timeout {
            Some(limit) => tokio::time::timeout(limit, exec)
                .await
                .map_err(|_| TransportError::Timeout(format!("starting {command}")))?,
            None => exec.await,
        };
        exec.map_err(|e| TransportError::Command(format!("failed to exec command: {e}")))?;

        Ok(SshProcess::spawn(channel))
    }

    async fn put_file(&mut self, path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let script = format!(
            "$o=[IO.File]::Create({});\
             while(($l=[Console]::In.ReadLine()) -ne $null){{\
             $b=[Convert]::FromBase64String($l);$o.Write($b,0,$b.Length)}};\
             $o.Close()",
            escape_powershell(path)
        );
        let mut process = self.execute(&powershell_invocation(&script), None).await?;

        if let Some(mut stdin) = process.take_stdin() {
            for chunk in contents.chunks(UPLOAD_CHUNK) {
                let mut line = BASE64.encode(chunk);
                line.push_str("\r\n");
                stdin.write_all(line.as_bytes()).await?;
            }
            stdin.shutdown().await?;
        }

        match process.wait().await? {
            0 => {
                debug!("Uploaded {} bytes to {}", contents.len(), path);
                Ok(())
            }
            code => Err(TransportError::Command(format!(
                "writing {path} failed with exit code {code}"
            ))),
        }
    }

    async fn exists(&mut self, path: &str) -> Result<bool, TransportError> {
        let quoted = quote_windows_argument(path);
        let code = self
            .run(&format!("if exist {quoted} (exit 0) else (exit 1)"))
            .await?;
        Ok(code == 0)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
        {
            debug!("SSH disconnect from {} failed: {}", self.target.host, e);
        }
    }
}

/// A command running on an SSH channel.
///
/// A background task moves bytes between the channel and local pipes, so
/// stdout and stdin can be handed out as plain async streams.
pub struct SshProcess {
    stdout: Option<DuplexStream>,
    stdin: Option<DuplexStream>,
    exit: Option<oneshot::Receiver<Option<u32>>>,
    status: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

impl SshProcess {
    fn spawn(channel: Channel<Msg>) -> Self {
        let (stdout_local, stdout_remote) = tokio::io::duplex(PIPE_BUFFER);
        let (stdin_local, stdin_remote) = tokio::io::duplex(PIPE_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(async move {
            let status = pump(channel, stdout_remote, stdin_remote, kill_rx).await;
            let _ = exit_tx.send(status);
        });

        Self {
            stdout: Some(stdout_local),
            stdin: Some(stdin_local),
            exit: Some(exit_rx),
            status: None,
            kill: Some(kill_tx),
        }
    }
}

#[async_trait]
impl RemoteProcess for SshProcess {
    fn take_stdout(&mut self) -> Option<RemoteReader> {
        self.stdout.take().map(|s| Box::new(s) as RemoteReader)
    }

    fn take_stdin(&mut self) -> Option<RemoteWriter> {
        self.stdin.take().map(|s| Box::new(s) as RemoteWriter)
    }

    async fn wait(&mut self) -> Result<u32, TransportError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        // Unclaimed pipes must not hold the channel open
        self.stdout = None;
        self.stdin = None;

        let exit = self.exit.take().ok_or(TransportError::Closed)?;
        let status = exit
            .await
            .ok()
            .flatten()
            .ok_or_else(|| TransportError::Command("channel closed without exit status".to_string()))?;
        self.status = Some(status);
        Ok(status)
    }

    async fn destroy(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Shuttle data between `channel` and the local pipe ends until the channel
/// closes or a kill is requested. Returns the exit status, if one was sent.
async fn pump(
    mut channel: Channel<Msg>,
    stdout: DuplexStream,
    mut stdin: DuplexStream,
    mut kill: oneshot::Receiver<()>,
) -> Option<u32> {
    let mut stdout = Some(stdout);
    let mut stdin_open = true;
    let mut buf = vec![0u8; 8192];
    let mut status = None;

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Some(out) = stdout.as_mut()
                        && out.write_all(&data).await.is_err()
                    {
                        // Reader went away; discard further output
                        stdout = None;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    trace!("[remote stderr] {}", String::from_utf8_lossy(&data).trim_end());
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = Some(exit_status);
                }
                Some(ChannelMsg::Eof) => {
                    stdout = None;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            read = stdin.read(&mut buf), if stdin_open => match read {
                Ok(0) | Err(_) => {
                    stdin_open = false;
                    if let Err(e) = channel.eof().await {
                        debug!("Failed to send EOF: {}", e);
                    }
                }
                Ok(n) => {
                    if let Err(e) = channel.data(&buf[..n]).await {
                        warn!("Failed to forward stdin: {}", e);
                        stdin_open = false;
                    }
                }
            },
            _ = &mut kill => {
                if let Err(e) = channel.close().await {
                    debug!("Failed to close channel: {}", e);
                }
                break;
            }
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;

    use kuiper_launcher::Secret;

    fn target() -> SessionTarget {
        SessionTarget {
            host: "10.0.0.5".to_string(),
            username: "Administrator".to_string(),
            password: Secret::new("hunter2"),
            use_https: false,
        }
    }

    #[test]
    fn test_transport_from_config() {
        let transport = SshTransport::from_config(&SshConfig::default());
        assert_eq!(transport.port, 22);
        assert_eq!(transport.connect_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_open_does_not_connect() {
        let transport = SshTransport::from_config(&SshConfig::default());
        let session = transport.open(target());
        assert_eq!(session.target(), &target());
        assert!(session.handle.is_none());
    }

    #[tokio::test]
    async fn test_closed_session_refuses_commands() {
        let transport = SshTransport::from_config(&SshConfig::default());
        let mut session = transport.open(target());
        session.close().await;
        session.close().await;

        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(matches!(
            session.exists(r"C:\Windows\Temp\.kuiper-init").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_ping_gives_up_on_silent_server() {
        // Accepts the TCP connection, never speaks SSH
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            std::future::pending::<()>().await;
            drop(socket);
        });

        let transport = SshTransport::from_config(&SshConfig {
            port,
            timeout_secs: 1,
        });
        let mut session = transport.open(SessionTarget {
            host: "127.0.0.1".to_string(),
            ..target()
        });

        let started = std::time::Instant::now();
        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(session.handle.is_none());
        server.abort();
    }
}
