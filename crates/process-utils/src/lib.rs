//! Process helpers for the supervised transcoder stages.
//!
//! Every child started by the relay goes through [`supervised_command`]: no
//! console window on Windows, a closed stdin, both output streams piped so they
//! can be drained, and `kill_on_drop` so a dropped handle never leaves an
//! orphan behind.

use std::ffi::OsStr;
use std::io;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a command for a long-running, supervised child.
///
/// stdin is closed, stdout/stderr are piped, the C locale is forced so
/// diagnostic output stays stable, and the child is killed when its handle is
/// dropped.
#[cfg(feature = "tokio")]
pub fn supervised_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    use std::process::Stdio;

    let mut cmd = tokio_command(program);
    cmd.env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Whether a kill error only means the process is already gone.
///
/// The OS reports `ESRCH` (surfaced as `NotFound` or a raw os error) when the
/// process exited between the status check and the signal.
pub fn is_already_exited(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        const ESRCH: i32 = 3;
        if err.raw_os_error() == Some(ESRCH) {
            return true;
        }
    }
    false
}

#[cfg(all(test, feature = "tokio", unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn supervised_command_pipes_output() {
        let mut child = supervised_command("sh")
            .args(["-c", "echo out; echo err 1>&2"])
            .spawn()
            .unwrap();

        let mut stdout = child.stdout.take().unwrap();
        let mut stderr = child.stderr.take().unwrap();
        let mut out = String::new();
        let mut err = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        stderr.read_to_string(&mut err).await.unwrap();
        child.wait().await.unwrap();

        assert_eq!(out.trim(), "out");
        assert_eq!(err.trim(), "err");
    }

    #[test]
    fn vanished_process_errors_are_recognised() {
        assert!(is_already_exited(&io::Error::from_raw_os_error(3)));
        assert!(is_already_exited(&io::Error::new(
            io::ErrorKind::NotFound,
            "no such process"
        )));
    }

    #[test]
    fn unrelated_errors_are_not_treated_as_exited() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!is_already_exited(&err));
    }
}
