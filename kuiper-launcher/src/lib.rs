//! Launcher for agents on freshly provisioned Windows instances.
//!
//! A launch attempt runs strictly in sequence:
//! - Wait for the instance address, credentials and a stable management endpoint
//! - Create the working directory and run the init script once (marker-guarded)
//! - Upload the agent payload and start it
//! - Bind the agent's stdout/stdin to the controller channel
//!
//! Cloud API, remote transport, payload source and controller channel are
//! supplied by the caller through the traits in this crate.

pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod context;
pub mod credentials;
pub mod deploy;
mod error;
pub mod establish;
pub mod instance;
pub mod launcher;
pub mod progress;
pub mod shell;
pub mod transport;

pub use channel::{AgentStreams, ChannelFactory, Teardown};
pub use config::LaunchSettings;
pub use context::{ConnectionStrategy, LaunchContext, SecurityMode, Secret};
pub use credentials::{CredentialSource, PasswordDecryptor};
pub use deploy::PayloadProvider;
pub use error::{CloudError, Error, TransportError};
pub use instance::{InstanceDescriber, InstanceDescription};
pub use launcher::{Collaborators, Launcher, Outcome};
pub use progress::{LogSink, Progress};
pub use transport::{RemoteProcess, RemoteSession, RemoteTransport, SessionTarget};

pub type Result<T, E = Error> = std::result::Result<T, E>;
