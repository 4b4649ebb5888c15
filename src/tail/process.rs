//! Spawning and terminating follow subprocesses.

use super::args::TailArgs;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Spawns `program` with piped stdout/stderr in its own process group.
pub fn spawn_tail(program: &Path, args: &TailArgs) -> io::Result<Child> {
    let mut command = Command::new(program);
    command
        .args(args.to_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    command.spawn()
}

/// SIGTERM to the child's process group, SIGKILL once `grace` runs out.
/// Always reaps the child.
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        terminate_unix(child, grace).await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn terminate_unix(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    // Already reaped.
    let Some(pid) = child.id() else {
        return child.wait().await;
    };
    let group = Pid::from_raw(pid as i32);

    if let Err(e) = signal::killpg(group, Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = tokio::time::timeout(grace, child.wait()).await {
        return result;
    }

    tracing::warn!(pid, "Tail process ignored SIGTERM, sending SIGKILL");
    let _ = signal::killpg(group, Signal::SIGKILL);
    child.kill().await?;
    child.wait().await
}
