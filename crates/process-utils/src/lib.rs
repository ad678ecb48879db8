//! Child process helpers: console-window suppression and signal delivery.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Ask a process to exit without forcing it.
///
/// Sends `SIGTERM` through `kill` on unix and a non-forced `taskkill` on Windows.
/// Returns `Ok(true)` when the signal was delivered, `Ok(false)` when the
/// process was already gone.
#[cfg(feature = "tokio")]
pub async fn request_terminate(pid: u32) -> std::io::Result<bool> {
    let pid = pid.to_string();

    #[cfg(unix)]
    let mut cmd = {
        let mut cmd = tokio_command("kill");
        cmd.args(["-TERM", pid.as_str()]);
        cmd
    };

    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = tokio_command("taskkill");
        cmd.args(["/PID", pid.as_str()]);
        cmd
    };

    let status = cmd
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}
