//! Event loop (C6): the collector's main loop, grounded in
//! `cberner-fuser`'s session read/dispatch loop (`Session::run`,
//! `ChannelBuffer`) adapted from "read one FUSE request, dispatch it" to
//! "read pipe bytes, scan for frames, reassemble, write to destination".
//!
//! Single-threaded and cooperative: one `poll` call per iteration waits on
//! the input pipe becoming readable or the next scheduled rotation,
//! whichever comes first. There is no separate "timer thread" — the
//! timeout arm of `poll` *is* the timer.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use chrono::Local;
use log::{debug, info, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::read;

use crate::config::LoggerConfig;
use crate::destination::DestinationRegistry;
use crate::error::{write_stderr, CollectorError, Result};
use crate::metainfo;
use crate::protocol::{scan, FrameEvent};
use crate::reassembler::Reassembler;
use crate::rotation::{duration_until, RotationEngine, RotationTrigger};
use crate::{retention, signals::SignalFlags};

/// Size of the read buffer. Matches the original's `PIPE_CHUNK_SIZE`-scale
/// reasoning: large enough that a full pipe write (`PIPE_BUF`, 4KiB on
/// Linux) plus whatever leftover bytes are carried over from a split header
/// always fits in one read.
const READ_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub struct Collector {
    pipe_fd: RawFd,
    preserved_stderr: RawFd,
    metainfo_path: PathBuf,
    collector_index: Option<usize>,
    privileged: bool,

    cfg: LoggerConfig,
    registry: DestinationRegistry,
    reassembler: Reassembler,
    rotation: RotationEngine,
    signals: SignalFlags,

    buf: Vec<u8>,
    buf_len: usize,
    pipe_eof_seen: bool,
}

impl Collector {
    pub fn new(
        pipe_fd: RawFd,
        preserved_stderr: RawFd,
        metainfo_path: PathBuf,
        cfg: LoggerConfig,
        registry: DestinationRegistry,
        signals: SignalFlags,
        collector_index: Option<usize>,
        privileged: bool,
    ) -> Self {
        let mut rotation = RotationEngine::default();
        rotation.arm_time_trigger(&cfg, Local::now());
        Collector {
            pipe_fd,
            preserved_stderr,
            metainfo_path,
            collector_index,
            privileged,
            cfg,
            registry,
            reassembler: Reassembler::default(),
            rotation,
            signals,
            buf: vec![0u8; READ_BUF_SIZE],
            buf_len: 0,
            pipe_eof_seen: false,
        }
    }

    /// Run until the input pipe reaches EOF, then flush everything and
    /// return. EOF, not a termination signal, is the sole shutdown trigger
    /// (§4.1, §9): the supervisor signals shutdown by closing its end of
    /// the pipe.
    pub fn run(&mut self) -> Result<()> {
        while !self.pipe_eof_seen {
            self.service_reload();

            if self.signals.take_rotation() {
                self.rotate_all(RotationTrigger::Explicit);
            }
            if self.time_rotation_due() {
                self.rotate_all(RotationTrigger::Time);
            }
            self.rotate_any_oversized();

            let timeout = self.poll_timeout();
            self.wait_and_service(timeout)?;
        }

        info!("pipe EOF observed, flushing residual buffers and exiting");
        self.shutdown_flush();
        Ok(())
    }

    fn time_rotation_due(&self) -> bool {
        self.rotation.time_trigger_due(Local::now())
    }

    fn rotate_any_oversized(&mut self) {
        let Some(limit) = self.cfg.log_rotation_size else {
            return;
        };
        let oversized: Vec<_> = crate::destination::DestKind::ALL
            .into_iter()
            .filter(|&d| self.registry.slot(d).is_open() && self.registry.slot(d).offset() >= limit)
            .collect();
        if oversized.is_empty() {
            return;
        }
        self.sweep_before_rotation();
        for dest in oversized {
            self.rotate_one(dest, RotationTrigger::Size);
        }
        self.rewrite_metainfo();
    }

    fn rotate_all(&mut self, trigger: RotationTrigger) {
        self.close_newly_disabled();
        self.sweep_before_rotation();
        for dest in crate::destination::DestKind::ALL {
            if self.cfg.destination_enabled(dest) {
                self.rotate_one(dest, trigger);
            }
        }
        if trigger == RotationTrigger::Time {
            self.rotation.arm_time_trigger(&self.cfg, Local::now());
        }
        self.rewrite_metainfo();
    }

    /// §4.4 step 1: a destination that configuration has turned off (and
    /// that isn't TEXT, which is always kept open) gets its file closed and
    /// its remembered filename dropped rather than rotated.
    fn close_newly_disabled(&mut self) {
        for dest in crate::destination::DestKind::ALL {
            if dest == crate::destination::DestKind::Text {
                continue;
            }
            if !self.cfg.destination_enabled(dest) && self.registry.slot(dest).is_open() {
                self.registry.slot_mut(dest).close();
            }
        }
    }

    fn rotate_one(&mut self, dest: crate::destination::DestKind, trigger: RotationTrigger) {
        let now = Local::now();
        if let Err(e) = self
            .rotation
            .rotate_destination(&self.cfg, dest, &mut self.registry, trigger, now, self.collector_index)
        {
            write_stderr(self.preserved_stderr, &format!("rotation failed: {e}"));
        }
    }

    /// §4.5/§4.6 step 4: before rotating, enumerate the log directory and run
    /// the retention sweeper, keeping whatever is currently open (the files
    /// about to be rotated away still count as "open" until rotation
    /// actually happens) so the sweep never deletes a file rotation hasn't
    /// gotten to yet.
    fn sweep_before_rotation(&mut self) {
        if !self.privileged {
            return;
        }
        let caps = retention::RetentionCaps {
            default: self.cfg.max_log_files,
            audit: self.cfg.max_auditlog_files,
            slow: self.cfg.max_slowlog_files,
        };
        let keep: Vec<_> = crate::destination::DestKind::ALL
            .into_iter()
            .filter_map(|d| self.registry.slot(d).filename().map(|p| p.to_path_buf()))
            .collect();
        if let Err(e) = retention::sweep(&self.cfg.log_directory, caps, &keep) {
            write_stderr(self.preserved_stderr, &format!("retention sweep failed: {e}"));
        }
    }

    fn rewrite_metainfo(&mut self) {
        if let Err(e) = metainfo::rewrite(&self.metainfo_path, &self.registry) {
            write_stderr(self.preserved_stderr, &format!("meta-info rewrite failed: {e}"));
        }
    }

    /// Reload a new configuration, mirroring `SysLoggerMain`'s reload
    /// branch: force a rotation if the directory/filename pattern changed,
    /// and if rotation had been latched off, clear every destination's
    /// latch and force rotation regardless (SPEC_FULL supplement 4).
    pub fn reload(&mut self, new_cfg: LoggerConfig) {
        let diff = self.cfg.diff_requires_rotation(&new_cfg);
        let was_any_disabled = crate::destination::DestKind::ALL
            .into_iter()
            .any(|d| self.rotation.is_disabled(d));

        self.cfg = new_cfg;

        if diff.force_rotation {
            if let Err(e) = std::fs::create_dir_all(&self.cfg.log_directory) {
                write_stderr(
                    self.preserved_stderr,
                    &format!("could not create log directory: {e}"),
                );
            }
        }

        if was_any_disabled {
            warn!("config reload clears a prior rotation-disabled latch; forcing rotation");
            self.rotation.reenable_all();
            self.rotate_all(RotationTrigger::Explicit);
        } else if diff.requires_action() {
            self.rotate_all(RotationTrigger::Explicit);
        }
    }

    fn service_reload(&mut self) {
        if self.signals.take_reload() {
            // An embedding supervisor is expected to have already updated
            // `self.cfg`-equivalent state and call `reload` directly; the
            // signal flag alone carries no new configuration. Owners that
            // drive this purely from SIGHUP call `reload` with an unchanged
            // config, which is a no-op beyond re-arming the time trigger.
            let cfg = self.cfg.clone();
            self.reload(cfg);
        }
    }

    fn poll_timeout(&self) -> PollTimeout {
        match self.rotation.next_time() {
            Some(t) => {
                let millis = duration_until(t).as_millis().min(u16::MAX as u128) as u16;
                PollTimeout::from(millis)
            }
            None => PollTimeout::NONE,
        }
    }

    fn wait_and_service(&mut self, timeout: PollTimeout) -> Result<()> {
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.pipe_fd) };
        let mut poll_fd = PollFd::new(borrowed, PollFlags::POLLIN);
        let fds = std::slice::from_mut(&mut poll_fd);

        match poll(fds, timeout) {
            Ok(0) => {
                // Timed out: nothing to read, but flush whatever's buffered
                // so a low-traffic destination doesn't sit unflushed
                // indefinitely between rotations.
                let _ = self.registry.flush_all();
            }
            Ok(_) => {
                if let Some(revents) = fds[0].revents() {
                    if revents.contains(PollFlags::POLLIN) {
                        self.drain_readable()?;
                    } else if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                        debug!("pipe reported POLLHUP/POLLERR with no POLLIN");
                        self.pipe_eof_seen = true;
                    }
                }
            }
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(CollectorError::Wait(e)),
        }
        Ok(())
    }

    fn drain_readable(&mut self) -> Result<()> {
        loop {
            let space = self.buf.len() - self.buf_len;
            if space == 0 {
                // A single record somehow exceeds the whole buffer with no
                // valid frame boundary found; this only happens for
                // pathological unframed input. Flush it as unframed text to
                // make forward progress rather than growing unboundedly.
                let dumped = std::mem::replace(&mut self.buf, vec![0u8; READ_BUF_SIZE]);
                let _ = self.registry.write(crate::destination::DestKind::Text, &dumped[..self.buf_len]);
                self.buf_len = 0;
                continue;
            }

            let read_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.pipe_fd) };
            let n = match read(read_fd, &mut self.buf[self.buf_len..]) {
                Ok(0) => {
                    self.pipe_eof_seen = true;
                    break;
                }
                Ok(n) => n,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(CollectorError::Wait(e)),
            };
            self.buf_len += n;

            // Non-privileged fan-out members (C8) read a socketpair carrying
            // only AUDIT-destined records; any unframed tail bytes on that
            // channel still belong to AUDIT, not TEXT, since such a member
            // has no TEXT file to fall back to in practice (§4.8).
            let unframed_dest = if self.privileged {
                crate::destination::DestKind::Text
            } else {
                crate::destination::DestKind::Audit
            };

            let mut to_write: Vec<(crate::destination::DestKind, Vec<u8>)> = Vec::new();
            let consumed_to = {
                let reassembler = &mut self.reassembler;
                let out = &mut to_write;
                let leftover = scan(&self.buf, self.buf_len, |event| match event {
                    FrameEvent::Chunk { pid, dest, payload, is_last } => {
                        if let Some((d, bytes)) = reassembler.on_chunk(pid, dest, payload, is_last) {
                            out.push((d, bytes));
                        }
                    }
                    FrameEvent::Unframed { bytes } => {
                        out.push((unframed_dest, bytes.to_vec()));
                    }
                });
                self.buf_len - leftover
            };

            for (dest, bytes) in to_write {
                if let Err(e) = self.registry.write(dest, &bytes) {
                    write_stderr(self.preserved_stderr, &format!("write failed: {e}"));
                }
            }

            if consumed_to > 0 {
                self.buf.copy_within(consumed_to..self.buf_len, 0);
                self.buf_len -= consumed_to;
            }

            if n < space {
                // Short read: the pipe had less buffered than we asked for,
                // treat it as "drained for now" rather than looping for a
                // second read that would just return EAGAIN anyway on a
                // blocking fd too (avoids busy-looping on small writers).
                break;
            }
        }
        Ok(())
    }

    fn shutdown_flush(&mut self) {
        for (_pid, dest, bytes) in self.reassembler.flush_residual() {
            let _ = self.registry.write(dest, &bytes);
        }
        let _ = self.registry.flush_all();
    }
}
