//! Agent payload upload and launch.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::bootstrap::WorkDir;
use crate::context::LaunchContext;
use crate::error::Error;
use crate::progress::Progress;
use crate::shell::quote_windows_argument;
use crate::transport::RemoteSession;

/// File name the agent payload is uploaded as.
pub const AGENT_PAYLOAD: &str = "agent.jar";

/// Execution timeout for the agent command. The agent runs for as long as the
/// channel lives; this only bounds the transport's bookkeeping.
pub const AGENT_EXEC_TIMEOUT: Duration = Duration::from_secs(86_400);

/// Provider of the agent executable.
#[async_trait]
pub trait PayloadProvider: Send + Sync {
    async fn fetch(&self, name: &str) -> std::io::Result<Vec<u8>>;
}

/// Fully assembled agent launch command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Remote path of the uploaded payload
    pub payload_path: String,
    /// Extra runtime options, inserted verbatim
    pub jvm_opts: Option<String>,
    /// Value passed as `-workDir`
    pub work_dir: String,
    command: String,
}

impl LaunchCommand {
    pub fn assemble(ctx: &LaunchContext, work_dir: &WorkDir) -> Self {
        let payload_path = work_dir.join(AGENT_PAYLOAD);
        let jvm_opts = ctx
            .jvm_opts
            .as_deref()
            .map(str::trim)
            .filter(|opts| !opts.is_empty())
            .map(str::to_string);
        let agent_work_dir = match ctx.remote_fs.as_deref().map(str::trim) {
            Some(remote_fs) if !remote_fs.is_empty() => quote_windows_argument(remote_fs),
            _ => work_dir.quoted(),
        };

        let mut parts = vec![quote_windows_argument(&ctx.java_path)];
        if let Some(opts) = &jvm_opts {
            parts.push(opts.clone());
        }
        parts.push("-jar".to_string());
        parts.push(quote_windows_argument(&payload_path));
        parts.push("-workDir".to_string());
        parts.push(agent_work_dir.clone());

        Self {
            payload_path,
            jvm_opts,
            work_dir: agent_work_dir,
            command: parts.join(" "),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.command
    }
}

/// Upload the agent payload into `work_dir` and start it.
///
/// The upload always overwrites any earlier copy.
pub async fn deploy<S: RemoteSession>(
    session: &mut S,
    ctx: &LaunchContext,
    work_dir: &WorkDir,
    payloads: &dyn PayloadProvider,
    progress: &Progress,
) -> Result<S::Process> {
    let payload = payloads
        .fetch(AGENT_PAYLOAD)
        .await
        .map_err(|e| Error::Payload(format!("failed to fetch {AGENT_PAYLOAD}: {e}")))?;

    let command = LaunchCommand::assemble(ctx, work_dir);
    session.put_file(&command.payload_path, &payload).await?;
    progress.info(format!("{AGENT_PAYLOAD} sent remotely. Bootstrapping it"));

    progress.info(format!("Launching agent: {}", command.as_str()));
    let process = session
        .execute(command.as_str(), Some(AGENT_EXEC_TIMEOUT))
        .await?;
    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_uses_work_dir_without_remote_fs() {
        let ctx = LaunchContext::new("i-0abc");
        let cmd = LaunchCommand::assemble(&ctx, &WorkDir::resolve(None));
        assert_eq!(
            cmd.as_str(),
            r"java -jar C:\Windows\Temp\agent.jar -workDir C:\Windows\Temp\"
        );
    }

    #[test]
    fn command_inserts_options_and_remote_fs() {
        let mut ctx = LaunchContext::new("i-0abc");
        ctx.jvm_opts = Some("-Xmx2g -Dfile.encoding=UTF-8".to_string());
        ctx.remote_fs = Some(r"C:\Agent Root".to_string());
        let cmd = LaunchCommand::assemble(&ctx, &WorkDir::resolve(Some(r"D:\tmp")));
        assert_eq!(
            cmd.as_str(),
            r#"java -Xmx2g -Dfile.encoding=UTF-8 -jar D:\tmp\agent.jar -workDir "C:\Agent Root""#
        );
        assert_eq!(cmd.payload_path, r"D:\tmp\agent.jar");
    }

    #[test]
    fn blank_options_and_remote_fs_are_ignored() {
        let mut ctx = LaunchContext::new("i-0abc");
        ctx.jvm_opts = Some("   ".to_string());
        ctx.remote_fs = Some(" ".to_string());
        ctx.java_path = r"C:\Program Files\Java\bin\java.exe".to_string();
        let cmd = LaunchCommand::assemble(&ctx, &WorkDir::resolve(None));
        assert_eq!(cmd.jvm_opts, None);
        assert_eq!(
            cmd.as_str(),
            r#""C:\Program Files\Java\bin\java.exe" -jar C:\Windows\Temp\agent.jar -workDir C:\Windows\Temp\"#
        );
    }
}
