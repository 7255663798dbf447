//! Multi-collector fan-out (C8): spawning more than one collector
//! generation so a high-volume AUDIT stream doesn't contend with the
//! general TEXT/CSV/JSON/SLOW stream on the same pipe, grounded in
//! `polar_enable_multi_syslogger`.
//!
//! Collector index 0 is privileged: it owns the anonymous pipe carrying the
//! full framed protocol (all five destinations) and is solely responsible
//! for running the retention sweep (§C5). Collectors at index 1..N each own
//! a dedicated `socketpair` carrying only AUDIT-destined records — a
//! producer that wants its audit trail isolated from general log traffic
//! writes to one of these instead of the shared pipe.

use std::os::unix::io::{IntoRawFd, RawFd};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::Pid;

use crate::bridge::{adopt_as_fd, spawn, CollectorHandle};
use crate::config::LoggerConfig;
use crate::error::{CollectorError, Result};

/// One entry per spawned collector generation.
#[derive(Debug)]
pub struct FanoutMember {
    pub index: usize,
    pub handle: CollectorHandle,
    /// `true` only for index 0: this collector runs the retention sweep and
    /// parses the full chunk-framing protocol. Members at index > 0 read an
    /// unframed byte stream from their socketpair and route every record to
    /// AUDIT unconditionally.
    pub privileged: bool,
}

/// Spawn `cfg.multi_collector_count` collector generations. Requires
/// `cfg.enable_multi_collector`; callers should check that before invoking
/// this (spawning multiple collectors when the feature is off would leave
/// N-1 of them with no producer ever writing to their channel).
pub fn spawn_fanout(cfg: &LoggerConfig, target_fd: RawFd) -> Result<Vec<FanoutMember>> {
    let count = cfg.multi_collector_count.max(1);
    let mut members = Vec::with_capacity(count);

    for index in 0..count {
        let handle = if index == 0 {
            spawn(target_fd)?
        } else {
            spawn_audit_only_member(target_fd)?
        };
        if let Some(handle) = handle {
            members.push(FanoutMember {
                index,
                handle,
                privileged: index == 0,
            });
        } else {
            // Child process: it runs its own event loop from here and never
            // returns through this function.
            return Ok(Vec::new());
        }
    }

    Ok(members)
}

fn spawn_audit_only_member(target_fd: RawFd) -> Result<Option<CollectorHandle>> {
    let (parent_sock, child_sock) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map_err(CollectorError::PipeSetup)?;

    // SAFETY: see `bridge::spawn`; the same post-fork constraints apply.
    match unsafe { nix::unistd::fork() }.map_err(CollectorError::Fork)? {
        nix::unistd::ForkResult::Parent { child } => {
            drop(child_sock);
            Ok(Some(CollectorHandle {
                write_fd: parent_sock.into_raw_fd(),
                child_pid: child,
            }))
        }
        nix::unistd::ForkResult::Child => {
            drop(parent_sock);
            let _ = adopt_as_fd(child_sock, target_fd);
            Ok(None)
        }
    }
}

/// Reap every member's child process. Called by the privileged member after
/// it observes its own pipe's EOF, on the assumption that the supervisor
/// closing the privileged pipe's write end means the whole generation is
/// shutting down together.
pub fn reap_all(members: &[FanoutMember]) -> Result<()> {
    for member in members {
        let _ = nix::sys::wait::waitpid(member.handle.child_pid, None);
    }
    Ok(())
}

/// Convenience used by tests and the supervisor to look up a member's pid.
pub fn pid_of(members: &[FanoutMember], index: usize) -> Option<Pid> {
    members.iter().find(|m| m.index == index).map(|m| m.handle.child_pid)
}
