//! Working directory preparation and one-time init script execution.

use crate::Result;
use crate::context::LaunchContext;
use crate::error::Error;
use crate::progress::Progress;
use crate::shell::{ensure_trailing_separator, quote_windows_argument};
use crate::transport::{RemoteProcess, RemoteSession};

/// Working directory used when none is configured.
pub const DEFAULT_TMP_DIR: &str = r"C:\Windows\Temp\";

/// File name the init script is uploaded as.
pub const INIT_SCRIPT_FILE: &str = "init.bat";

/// Marker proving the init script already succeeded in a working directory.
pub const INIT_MARKER_FILE: &str = ".kuiper-init";

/// Content written to [`INIT_MARKER_FILE`].
pub const INIT_MARKER_CONTENT: &[u8] = b"init ran";

/// Remote working directory, always ending with a separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir(String);

impl WorkDir {
    /// The configured directory if non-empty, else [`DEFAULT_TMP_DIR`].
    pub fn resolve(configured: Option<&str>) -> Self {
        match configured.map(str::trim).filter(|dir| !dir.is_empty()) {
            Some(dir) => Self(ensure_trailing_separator(dir)),
            None => Self(DEFAULT_TMP_DIR.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of `name` inside this directory.
    pub fn join(&self, name: &str) -> String {
        format!("{}{}", self.0, name)
    }

    /// Directory quoted for use as a `cmd.exe` argument.
    pub fn quoted(&self) -> String {
        quote_windows_argument(&self.0)
    }
}

/// What happened to the init script during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    /// No init script configured.
    NotConfigured,
    /// Marker already present; the script was not run again.
    AlreadyDone,
    /// Script ran successfully and the marker was written.
    Completed,
}

/// Remote state after a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapState {
    pub work_dir: WorkDir,
    pub initialization: Initialization,
}

/// Ensure the working directory exists and run the init script once.
///
/// A nonzero exit status aborts the launch with [`Error::CommandFailed`]. A
/// failed init script leaves the instance without the marker, so the next
/// attempt runs it again.
pub async fn bootstrap<S: RemoteSession>(
    session: &mut S,
    ctx: &LaunchContext,
    progress: &Progress,
) -> Result<BootstrapState> {
    let work_dir = WorkDir::resolve(ctx.tmp_dir.as_deref());

    progress.info("Creating tmp directory if it does not exist");
    let quoted = work_dir.quoted();
    let mut mkdir = session
        .execute(&format!("if not exist {quoted} mkdir {quoted}"), None)
        .await?;
    let exit_code = mkdir.wait().await?;
    if exit_code != 0 {
        progress.info(format!("Creating tmpdir failed={exit_code}"));
        return Err(Error::CommandFailed {
            step: "creating tmp directory",
            exit_code,
        });
    }

    let initialization = match ctx.init_script() {
        None => Initialization::NotConfigured,
        Some(script) => {
            if session.exists(&work_dir.join(INIT_MARKER_FILE)).await? {
                progress.info("Init script already ran, skipping");
                Initialization::AlreadyDone
            } else {
                run_init_script(session, &work_dir, script, progress).await?;
                Initialization::Completed
            }
        }
    };

    Ok(BootstrapState {
        work_dir,
        initialization,
    })
}

async fn run_init_script<S: RemoteSession>(
    session: &mut S,
    work_dir: &WorkDir,
    script: &str,
    progress: &Progress,
) -> Result<()> {
    progress.info("Executing init script");
    let script_path = work_dir.join(INIT_SCRIPT_FILE);
    session.put_file(&script_path, script.as_bytes()).await?;

    let mut init = session
        .execute(
            &format!("cmd /c {}", quote_windows_argument(&script_path)),
            None,
        )
        .await?;
    if let Some(stdout) = init.take_stdout() {
        progress.pipe(stdout).await?;
    }

    let exit_code = init.wait().await?;
    if exit_code != 0 {
        progress.info(format!("init script failed: exit code={exit_code}"));
        return Err(Error::CommandFailed {
            step: "init script",
            exit_code,
        });
    }

    session
        .put_file(&work_dir.join(INIT_MARKER_FILE), INIT_MARKER_CONTENT)
        .await?;
    progress.info("init script ran successfully");
    Ok(())
}
