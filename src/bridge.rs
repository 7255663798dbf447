//! Supervisor bridge (C7): the plumbing a parent process uses to spawn a
//! collector generation and wire its input pipe, grounded in
//! `SysLoggerMain`'s pipe-then-fork sequence and `cberner-fuser`'s own
//! fd-hygiene-around-a-syscall-boundary style (`Channel::new`,
//! `ll::fuse_abi` buffer ownership).
//!
//! The supervisor creates the pipe *before* forking so both ends exist in
//! the parent, then the child dup2's the read end onto its own stdin-like
//! input descriptor while the parent keeps only the write end (redirected
//! onto the supervised process's stdout/stderr). This ordering means a
//! crash between fork and dup2 never leaves the pipe without a reader.

use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::unistd::{close, dup2, fork, pipe, ForkResult, Pid};

use crate::config::LoggerConfig;
use crate::destination::{Buffering, DestKind, DestinationRegistry, FileSlot};
use crate::error::{CollectorError, Result};

/// The parent's view of a spawned collector generation: the pipe write end
/// it should redirect the supervised process's stdio onto, and the child
/// pid for `waitpid`.
#[derive(Debug)]
pub struct CollectorHandle {
    pub write_fd: RawFd,
    pub child_pid: Pid,
}

/// A preserved file descriptor the child keeps open across its own
/// stderr-to-`/dev/null` redirect, for [`crate::error::write_stderr`].
#[derive(Debug)]
pub struct PreservedStderr(pub RawFd);

/// Pre-open destinations that must survive a collector restart without data
/// loss: TEXT/CSV/JSON per spec §6, plus AUDIT when enabled (SPEC_FULL
/// supplement 1) — opened by the *parent*, before forking, so a concurrent
/// writer's audit trail isn't interrupted by the brief window between a
/// crashed collector and its replacement.
pub fn preopen_destinations(cfg: &LoggerConfig, registry: &mut DestinationRegistry, now_suffix: &str) -> Result<()> {
    for dest in [DestKind::Text, DestKind::Csv, DestKind::Json, DestKind::Audit] {
        if !cfg.destination_enabled(dest) {
            continue;
        }
        let filename = format!("{now_suffix}{}", dest.suffix());
        let path = cfg.log_directory.join(&filename);
        let file = FileSlot::open(&path, false, cfg.log_file_mode)?;
        let starting_offset = file.metadata().map(|m| m.len()).unwrap_or(0);
        let buffering = if dest == DestKind::Audit && cfg.enable_audit_file_buffer {
            Buffering::Full
        } else {
            Buffering::Line
        };
        registry.slot_mut(dest).install(file, path, buffering, starting_offset);
    }
    Ok(())
}

/// Create the pipe, fork, and in the child: close the write end, dup2 the
/// read end onto `target_fd` (the descriptor the collector's event loop
/// reads from), and redirect the supervised process's stdout/stderr onto
/// the pipe's write end in the parent.
///
/// Returns `Some(handle)` in the parent, `None` in the child (the child
/// continues by entering [`crate::collector::Collector::run`] on
/// `target_fd`, it does not return through this call at all in practice;
/// `None` exists only so this function's type is expressible — callers
/// should treat the child branch as diverging).
pub fn spawn(target_fd: RawFd) -> Result<Option<CollectorHandle>> {
    let (read_fd, write_fd) = pipe().map_err(CollectorError::PipeSetup)?;

    // SAFETY: `fork()` is called with no other threads holding locks this
    // process depends on at startup; the child immediately dup2's and
    // execs-or-runs the event loop without allocating in a way that would
    // be unsafe post-fork before exec.
    match unsafe { fork() }.map_err(CollectorError::Fork)? {
        ForkResult::Parent { child } => {
            drop(read_fd);
            Ok(Some(CollectorHandle {
                write_fd: write_fd.into_raw_fd(),
                child_pid: child,
            }))
        }
        ForkResult::Child => {
            drop(write_fd);
            let _ = adopt_as_fd(read_fd, target_fd);
            Ok(None)
        }
    }
}

/// Install `fd` as descriptor number `target_fd`: `dup2` onto it if `fd`
/// isn't already that number, then stop tracking whichever descriptor ends
/// up redundant so its `Drop` doesn't close the one still in use.
pub(crate) fn adopt_as_fd(fd: OwnedFd, target_fd: RawFd) -> nix::Result<()> {
    if fd.as_raw_fd() == target_fd {
        std::mem::forget(fd);
    } else {
        dup2(fd.as_raw_fd(), target_fd)?;
        // `fd` drops here, closing the now-redundant original descriptor.
    }
    Ok(())
}

/// Redirect the calling process's own `stderr` to `/dev/null`, returning a
/// duplicate of the original descriptor for [`crate::error::write_stderr`]
/// to keep using. Mirrors the original's rationale: once `redirection_done`
/// is true, anything the collector itself writes to `STDERR_FILENO` would
/// loop back into the pipe it is reading from.
pub fn redirect_own_stderr_to_devnull() -> Result<PreservedStderr> {
    use nix::fcntl::{open, OFlag};
    use nix::sys::stat::Mode;
    use nix::unistd::dup;

    let stderr_fd = std::io::stderr().as_raw_fd();
    let preserved = dup(stderr_fd).map_err(CollectorError::PipeSetup)?;

    let devnull = open(Path::new("/dev/null"), OFlag::O_WRONLY, Mode::empty())
        .map_err(CollectorError::PipeSetup)?;
    dup2(devnull, stderr_fd).map_err(CollectorError::PipeSetup)?;
    let _ = close(devnull);

    Ok(PreservedStderr(preserved.into_raw_fd()))
}

/// Wrap a raw fd as a [`File`] without taking ownership away from whatever
/// already owns the descriptor's lifetime (the caller is responsible for
/// not double-closing).
///
/// # Safety
/// `fd` must be a valid, currently-open descriptor.
pub unsafe fn borrow_fd_as_file(fd: RawFd) -> std::mem::ManuallyDrop<File> {
    std::mem::ManuallyDrop::new(unsafe { File::from_raw_fd(fd) })
}
