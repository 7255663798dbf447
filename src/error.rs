//! Crate error type and the narrow "preserved stderr" escape hatch.
//!
//! Ordinary failures inside the collector are reported through the `log`
//! facade. A handful of failures must never go through `log`, because by the
//! time they happen the collector's own stdio no longer points anywhere
//! useful (or worse, points back into its own input pipe, which would
//! recurse). Those use [`write_stderr`] to write directly to a descriptor the
//! collector preserved at startup, bypassing any logger entirely.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

/// Errors surfaced by the collector's own components.
///
/// This type is intentionally hand-rolled (`Display` + `std::error::Error`)
/// rather than derived: it mirrors the style of request-parsing errors in
/// the wire-protocol code this crate's event loop is modeled on, where each
/// variant names a specific failure instead of wrapping an opaque cause.
#[derive(Debug)]
pub enum CollectorError {
    /// The pipe/socket read end could not be set up.
    PipeSetup(io::Error),
    /// A destination file could not be opened and rotation should not retry.
    LogfileOpen { path: String, source: io::Error },
    /// The meta-info datafile could not be rewritten.
    MetaInfoWrite(io::Error),
    /// `fork()` failed while spawning a collector generation.
    Fork(nix::Error),
    /// A signal handler could not be installed.
    SignalSetup(nix::Error),
    /// The wait/poll primitive failed for a reason other than `EINTR`.
    Wait(nix::Error),
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::PipeSetup(e) => write!(f, "could not create pipe: {e}"),
            CollectorError::LogfileOpen { path, source } => {
                write!(f, "could not open log file \"{path}\": {source}")
            }
            CollectorError::MetaInfoWrite(e) => {
                write!(f, "could not write meta-info datafile: {e}")
            }
            CollectorError::Fork(e) => write!(f, "could not fork collector process: {e}"),
            CollectorError::SignalSetup(e) => write!(f, "could not install signal handler: {e}"),
            CollectorError::Wait(e) => write!(f, "could not wait for pipe/latch events: {e}"),
        }
    }
}

impl std::error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectorError::PipeSetup(e) | CollectorError::MetaInfoWrite(e) => Some(e),
            CollectorError::LogfileOpen { source, .. } => Some(source),
            CollectorError::Fork(e) | CollectorError::SignalSetup(e) | CollectorError::Wait(e) => {
                Some(e)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;

/// Write a message directly to a preserved file descriptor, never through
/// `log`. Used for fatal in-core errors: the descriptor must be one the
/// caller stashed before redirecting its own stderr to `/dev/null`, not the
/// collector's current `STDERR_FILENO` (which would loop back into the pipe
/// this process is itself reading from).
///
/// Best-effort: failures writing the error report are silently dropped,
/// there is nowhere left to report them.
pub fn write_stderr(fd: RawFd, msg: &str) {
    use std::io::Write;
    // SAFETY: `fd` is expected to be a valid, open descriptor owned by the
    // caller for the lifetime of this call; we do not take ownership of it.
    let mut file = unsafe {
        use std::os::unix::io::FromRawFd;
        std::mem::ManuallyDrop::new(std::fs::File::from_raw_fd(fd))
    };
    let _ = file.write_all(msg.as_bytes());
    let _ = file.write_all(b"\n");
}
