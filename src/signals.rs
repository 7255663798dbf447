//! Signal plumbing (spec §5): the collector reacts to `SIGHUP` (reload
//! config) and `SIGUSR1` (force an immediate rotation) via self-pipe flags
//! rather than doing work inside a signal handler. Every other signal a
//! terminal-facing process normally cares about is ignored — termination is
//! driven exclusively by EOF on the input pipe (§4.1, §9: "the collector
//! outlives its own shutdown signal so it can drain in-flight records").
//!
//! Grounded in `signal_hook::iterator`'s self-pipe registration, the same
//! crate `other_examples` pulls in for async-signal-safe wakeup plumbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGALRM, SIGCHLD, SIGHUP, SIGINT, SIGPIPE, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;

use crate::error::{CollectorError, Result};

/// Flags flipped by the signal thread/handler and polled by the event loop.
#[derive(Clone, Default, Debug)]
pub struct SignalFlags {
    pub reload_requested: Arc<AtomicBool>,
    pub rotation_requested: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn take_reload(&self) -> bool {
        self.reload_requested.swap(false, Ordering::AcqRel)
    }

    pub fn take_rotation(&self) -> bool {
        self.rotation_requested.swap(false, Ordering::AcqRel)
    }

    pub fn request_rotation(&self) {
        self.rotation_requested.store(true, Ordering::Release);
    }
}

/// Install handlers for every signal the collector cares about, spawning
/// `signal_hook`'s background forwarding thread. Returns the flag set the
/// event loop should poll each iteration.
///
/// `SIGINT`/`SIGTERM`/`SIGQUIT` are explicitly *ignored*, not just
/// un-handled: the collector is meant to survive its supervisor's shutdown
/// signal long enough to observe pipe EOF and flush. `SIGPIPE` is ignored so
/// a write to an already-closed destination returns `EPIPE` instead of
/// killing the process. `SIGALRM`/`SIGUSR2` are unused by this crate but
/// ignored anyway in case an embedding supervisor's process group forwards
/// them. `SIGCHLD` is left at its default disposition: the bridge module
/// reaps its own children explicitly via `waitpid`.
pub fn install() -> Result<SignalFlags> {
    let flags = SignalFlags::default();

    ignore_signals(&[SIGINT, SIGTERM, SIGQUIT, SIGPIPE, SIGALRM, SIGUSR2])
        .map_err(CollectorError::SignalSetup)?;

    let mut signals = Signals::new([SIGHUP, SIGUSR1])
        .map_err(|e| CollectorError::SignalSetup(nix::Error::from_raw(e.raw_os_error().unwrap_or(0))))?;

    let reload_flag = flags.reload_requested.clone();
    let rotation_flag = flags.rotation_requested.clone();
    std::thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGHUP => reload_flag.store(true, Ordering::Release),
                SIGUSR1 => rotation_flag.store(true, Ordering::Release),
                _ => {}
            }
        }
    });

    Ok(flags)
}

fn ignore_signals(sigs: &[i32]) -> std::result::Result<(), nix::Error> {
    use nix::sys::signal::{self, SigHandler, Signal};
    for &raw in sigs {
        let sig = Signal::try_from(raw).map_err(|_| nix::Error::EINVAL)?;
        // SAFETY: SIG_IGN takes no handler state and is async-signal-safe by
        // definition; this is the standard way to mask a signal for the
        // whole process.
        unsafe {
            signal::signal(sig, SigHandler::SigIgn)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip_and_clear_on_take() {
        let flags = SignalFlags::default();
        assert!(!flags.take_reload());
        flags.reload_requested.store(true, Ordering::Release);
        assert!(flags.take_reload());
        assert!(!flags.take_reload());
    }

    #[test]
    fn request_rotation_sets_flag() {
        let flags = SignalFlags::default();
        flags.request_rotation();
        assert!(flags.take_rotation());
    }
}
