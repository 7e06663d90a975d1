//! In-memory collaborators for launcher integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kuiper_launcher::channel::{AgentStreams, ChannelFactory, Teardown};
use kuiper_launcher::credentials::{CredentialResolver, CredentialSource, PasswordDecryptor};
use kuiper_launcher::deploy::PayloadProvider;
use kuiper_launcher::instance::{InstanceDescriber, InstanceDescription};
use kuiper_launcher::progress::{LogSink, Progress};
use kuiper_launcher::transport::{
    RemoteProcess, RemoteReader, RemoteSession, RemoteTransport, RemoteWriter, SessionTarget,
};
use kuiper_launcher::{CloudError, Collaborators, Error, Launcher, Secret, TransportError};
use tokio::time::Instant;

pub const ADDRESS: &str = "10.0.0.5";
pub const AGENT_BYTES: &[u8] = b"AGENT-BYTES";

/// Observable state of the fake remote host.
#[derive(Debug)]
pub struct Remote {
    started: Instant,
    /// Scripted ping results; `Ok(true)` once exhausted
    pub pings: VecDeque<Result<bool, ()>>,
    pub ping_times: Vec<Duration>,
    /// Pings never complete
    pub hang_pings: bool,
    pub opened: Vec<(SessionTarget, Duration)>,
    pub files: BTreeMap<String, Vec<u8>>,
    /// Paths in upload order
    pub uploads: Vec<String>,
    pub commands: Vec<(String, Option<Duration>)>,
    pub mkdir_exit: u32,
    pub init_exit: u32,
    pub init_output: Vec<u8>,
    pub closed: usize,
    pub destroyed: usize,
}

impl Remote {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.commands.iter().any(|(cmd, _)| cmd.starts_with(prefix))
    }
}

#[derive(Clone)]
pub struct FakeTransport {
    pub remote: Arc<Mutex<Remote>>,
}

impl RemoteTransport for FakeTransport {
    type Session = FakeSession;

    fn open(&self, target: SessionTarget) -> FakeSession {
        let mut remote = self.remote.lock().unwrap();
        let at = remote.elapsed();
        remote.opened.push((target.clone(), at));
        FakeSession {
            target,
            remote: self.remote.clone(),
            closed: false,
        }
    }
}

#[derive(Debug)]
pub struct FakeSession {
    target: SessionTarget,
    remote: Arc<Mutex<Remote>>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    type Process = FakeProcess;

    fn target(&self) -> &SessionTarget {
        &self.target
    }

    async fn ping(&mut self) -> Result<bool, TransportError> {
        let scripted = {
            let mut remote = self.remote.lock().unwrap();
            let at = remote.elapsed();
            remote.ping_times.push(at);
            if remote.hang_pings {
                None
            } else {
                Some(remote.pings.pop_front())
            }
        };
        match scripted {
            None => std::future::pending().await,
            Some(Some(Ok(reachable))) => Ok(reachable),
            Some(Some(Err(()))) => Err(TransportError::Connect("connection refused".to_string())),
            Some(None) => Ok(true),
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<FakeProcess, TransportError> {
        let mut remote = self.remote.lock().unwrap();
        remote.commands.push((command.to_string(), timeout));
        let (exit, output) = if command.starts_with("if not exist") {
            (remote.mkdir_exit, Vec::new())
        } else if command.starts_with("cmd /c") {
            (remote.init_exit, remote.init_output.clone())
        } else {
            (0, b"agent output".to_vec())
        };
        Ok(FakeProcess {
            stdout: Some(Box::new(std::io::Cursor::new(output))),
            stdin: Some(Box::new(tokio::io::sink())),
            exit,
            remote: self.remote.clone(),
        })
    }

    async fn put_file(&mut self, path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let mut remote = self.remote.lock().unwrap();
        remote.files.insert(path.to_string(), contents.to_vec());
        remote.uploads.push(path.to_string());
        Ok(())
    }

    async fn exists(&mut self, path: &str) -> Result<bool, TransportError> {
        Ok(self.remote.lock().unwrap().files.contains_key(path))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.remote.lock().unwrap().closed += 1;
        }
    }
}

pub struct FakeProcess {
    stdout: Option<RemoteReader>,
    stdin: Option<RemoteWriter>,
    exit: u32,
    remote: Arc<Mutex<Remote>>,
}

#[async_trait]
impl RemoteProcess for FakeProcess {
    fn take_stdout(&mut self) -> Option<RemoteReader> {
        self.stdout.take()
    }

    fn take_stdin(&mut self) -> Option<RemoteWriter> {
        self.stdin.take()
    }

    async fn wait(&mut self) -> Result<u32, TransportError> {
        Ok(self.exit)
    }

    async fn destroy(&mut self) {
        self.remote.lock().unwrap().destroyed += 1;
    }
}

/// Scripted describe results: `Ok(None)` means no address assigned.
pub struct FakeDescriber {
    started: Instant,
    pub responses: Mutex<VecDeque<Result<Option<&'static str>, &'static str>>>,
    pub calls: Mutex<Vec<Duration>>,
}

#[async_trait]
impl InstanceDescriber for FakeDescriber {
    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription, CloudError> {
        self.calls.lock().unwrap().push(self.started.elapsed());
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Some(ADDRESS)));
        let public_ip = response.map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(InstanceDescription {
            instance_id: instance_id.to_string(),
            public_ip: public_ip.map(str::to_string),
            ..Default::default()
        })
    }
}

/// Scripted password material; `Ok(Some("ENCRYPTED"))` once exhausted.
pub struct FakeCredentials {
    started: Instant,
    pub responses: Mutex<VecDeque<Result<Option<&'static str>, &'static str>>>,
    pub calls: Mutex<Vec<Duration>>,
}

#[async_trait]
impl CredentialSource for FakeCredentials {
    async fn encrypted_password(&self, _instance_id: &str) -> Result<Option<String>, CloudError> {
        self.calls.lock().unwrap().push(self.started.elapsed());
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Some("ENCRYPTED")));
        response
            .map(|material| material.map(str::to_string))
            .map_err(|e| CloudError::Api(e.to_string()))
    }
}

pub struct FakeDecryptor;

#[async_trait]
impl PasswordDecryptor for FakeDecryptor {
    async fn decrypt(&self, material: &str) -> Result<Secret, CloudError> {
        if material == "GARBAGE" {
            return Err(CloudError::Decrypt("bad padding".to_string()));
        }
        Ok(Secret::new(format!("plain-{material}")))
    }
}

pub struct FakePayloads;

#[async_trait]
impl PayloadProvider for FakePayloads {
    async fn fetch(&self, _name: &str) -> std::io::Result<Vec<u8>> {
        Ok(AGENT_BYTES.to_vec())
    }
}

#[derive(Default)]
pub struct FakeChannels {
    pub fail: Mutex<bool>,
    pub bound: Mutex<Vec<(String, Teardown)>>,
}

impl FakeChannels {
    /// Close the channel from the controller side.
    pub async fn close(&self) -> bool {
        let teardown = self.bound.lock().unwrap().last().map(|(_, t)| t.clone());
        match teardown {
            Some(teardown) => teardown.run().await,
            None => false,
        }
    }
}

#[async_trait]
impl ChannelFactory for FakeChannels {
    async fn bind(
        &self,
        name: &str,
        _streams: AgentStreams,
        _log: Arc<dyn LogSink>,
        on_close: Teardown,
    ) -> Result<(), Error> {
        if *self.fail.lock().unwrap() {
            return Err(Error::channel("controller refused channel"));
        }
        self.bound
            .lock()
            .unwrap()
            .push((name.to_string(), on_close));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }
}

impl LogSink for MemorySink {
    fn line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// All fakes wired together.
pub struct Harness {
    pub remote: Arc<Mutex<Remote>>,
    pub describer: Arc<FakeDescriber>,
    pub credentials: Arc<FakeCredentials>,
    pub channels: Arc<FakeChannels>,
    pub log: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        let started = Instant::now();
        let remote = Remote {
            started,
            pings: VecDeque::new(),
            ping_times: Vec::new(),
            hang_pings: false,
            opened: Vec::new(),
            files: BTreeMap::new(),
            uploads: Vec::new(),
            commands: Vec::new(),
            mkdir_exit: 0,
            init_exit: 0,
            init_output: b"installing tools\r\ndone\r\n".to_vec(),
            closed: 0,
            destroyed: 0,
        };
        Self {
            remote: Arc::new(Mutex::new(remote)),
            describer: Arc::new(FakeDescriber {
                started,
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }),
            credentials: Arc::new(FakeCredentials {
                started,
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }),
            channels: Arc::new(FakeChannels::default()),
            log: Arc::new(MemorySink::default()),
        }
    }

    pub fn describe_responses(&self, responses: Vec<Result<Option<&'static str>, &'static str>>) {
        *self.describer.responses.lock().unwrap() = responses.into();
    }

    pub fn credential_responses(
        &self,
        responses: Vec<Result<Option<&'static str>, &'static str>>,
    ) {
        *self.credentials.responses.lock().unwrap() = responses.into();
    }

    pub fn pings(&self, pings: Vec<Result<bool, ()>>) {
        self.remote.lock().unwrap().pings = pings.into();
    }

    pub fn transport(&self) -> FakeTransport {
        FakeTransport {
            remote: self.remote.clone(),
        }
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.log.clone())
    }

    pub fn resolver(&self) -> CredentialResolver {
        CredentialResolver::new(self.credentials.clone(), Arc::new(FakeDecryptor))
    }

    pub fn launcher(&self) -> Launcher<FakeTransport> {
        Launcher::new(
            self.transport(),
            Collaborators {
                describer: self.describer.clone(),
                credentials: self.credentials.clone(),
                decryptor: Arc::new(FakeDecryptor),
                payloads: Arc::new(FakePayloads),
                channels: self.channels.clone(),
                log: self.log.clone(),
            },
        )
    }

    pub fn remote(&self) -> std::sync::MutexGuard<'_, Remote> {
        self.remote.lock().unwrap()
    }
}
