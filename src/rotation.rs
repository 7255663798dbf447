//! Rotation engine (C4): per-destination state machine deciding when and how
//! to open a fresh logfile, grounded in `syslogger.c`'s `logfile_rotate_dest`
//! and `set_next_rotation_time`.
//!
//! Destinations are always processed in [`DestKind::ALL`] order: TEXT, CSV,
//! JSON, AUDIT, SLOW. Each carries its own `rotation_disabled` latch, set
//! when opening its file failed for a reason judged persistent (permissions,
//! missing directory) rather than transient (the process or system is
//! momentarily out of file descriptors).

use std::os::unix::io::AsRawFd;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Timelike};
use nix::fcntl::{posix_fadvise, PosixFadviseAdvice};

use crate::config::LoggerConfig;
use crate::destination::{Buffering, DestKind, DestinationRegistry, FileSlot};
use crate::error::{CollectorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    Time,
    Size,
    Explicit,
}

/// Compute the strftime-expanded filename for `dest` under `pattern`.
///
/// `pattern` is expected to end in `.log` by convention (as `Log_filename`'s
/// default does); that suffix is stripped and replaced with `dest`'s own
/// suffix for every non-TEXT destination. When `collector_index` is `Some`
/// and nonzero (a secondary collector in a multi-collector fan-out, C8), an
/// `_<index>` tag is inserted before the AUDIT suffix so concurrent
/// collectors don't clobber each other's audit file.
pub fn compute_filename(
    pattern: &str,
    now: DateTime<Local>,
    dest: DestKind,
    collector_index: Option<usize>,
) -> String {
    let formatted = now.format(pattern).to_string();
    let base = formatted.strip_suffix(".log").unwrap_or(&formatted);

    if dest == DestKind::Text {
        return format!("{base}.log");
    }

    let mut name = base.to_string();
    if dest == DestKind::Audit {
        if let Some(idx) = collector_index {
            if idx > 0 {
                name.push('_');
                name.push_str(&idx.to_string());
            }
        }
    }
    name.push_str(dest.suffix());
    name
}

/// Round `now` down to local midnight, then step forward by `age` until
/// strictly after `now`. This keeps rotation boundaries aligned to
/// wall-clock multiples of the rotation age (e.g. every 24h lands at
/// midnight) instead of drifting relative to collector startup time,
/// mirroring `set_next_rotation_time`.
pub fn next_rotation_time(now: DateTime<Local>, age: Duration) -> DateTime<Local> {
    let midnight = now
        .with_hour(0)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(now);

    let age_secs = age.as_secs().max(1) as i64;
    let mut candidate = midnight;
    while candidate <= now {
        candidate += chrono::Duration::seconds(age_secs);
    }
    candidate
}

/// Per-destination rotation bookkeeping.
#[derive(Debug)]
pub struct RotationEngine {
    next_rotation_time: Option<DateTime<Local>>,
    disabled: [bool; 5],
}

impl Default for RotationEngine {
    fn default() -> Self {
        RotationEngine {
            next_rotation_time: None,
            disabled: [false; 5],
        }
    }
}

impl RotationEngine {
    pub fn is_disabled(&self, dest: DestKind) -> bool {
        self.disabled[dest.index()]
    }

    /// Clear every destination's disabled latch and force an immediate
    /// rotation request, the behavior the original applies when a reload
    /// re-enables a previously-failing rotation (§4.6 / SPEC_FULL supplement
    /// 4).
    pub fn reenable_all(&mut self) {
        self.disabled = [false; 5];
    }

    pub fn next_time(&self) -> Option<DateTime<Local>> {
        self.next_rotation_time
    }

    pub fn arm_time_trigger(&mut self, cfg: &LoggerConfig, now: DateTime<Local>) {
        self.next_rotation_time = cfg.log_rotation_age.map(|age| next_rotation_time(now, age));
    }

    /// Whether the armed time-based trigger has elapsed. Size-based
    /// triggers are checked by the event loop directly against each open
    /// slot's `offset`, independently of this call.
    pub fn time_trigger_due(&self, now: DateTime<Local>) -> bool {
        matches!(self.next_rotation_time, Some(t) if now >= t)
    }

    /// Perform rotation of a single destination: compute the new filename,
    /// decide truncate-vs-append, open the file, and install it. On
    /// transient failure (`EMFILE`/`ENFILE`) the destination is left as-is
    /// and no latch is set, so the next trigger retries. On any other
    /// failure the destination's `rotation_disabled` latch is set and the
    /// error is returned for the caller to report via the preserved-stderr
    /// escape hatch.
    pub fn rotate_destination(
        &mut self,
        cfg: &LoggerConfig,
        dest: DestKind,
        registry: &mut DestinationRegistry,
        trigger: RotationTrigger,
        now: DateTime<Local>,
        collector_index: Option<usize>,
    ) -> Result<()> {
        if self.is_disabled(dest) {
            return Ok(());
        }

        let new_name = compute_filename(&cfg.log_filename, now, dest, collector_index);
        let new_path = cfg.log_directory.join(&new_name);

        let truncate = cfg.log_truncate_on_rotation
            && trigger == RotationTrigger::Time
            && registry
                .slot(dest)
                .filename()
                .map(|existing| existing.file_name() != new_path.file_name())
                .unwrap_or(true);

        let buffering = if dest == DestKind::Audit && cfg.enable_audit_file_buffer {
            Buffering::Full
        } else {
            Buffering::Line
        };

        match FileSlot::open(&new_path, truncate, cfg.log_file_mode) {
            Ok(file) => {
                if truncate {
                    let _ = posix_fadvise(
                        file.as_raw_fd(),
                        0,
                        0,
                        PosixFadviseAdvice::POSIX_FADV_DONTNEED,
                    );
                }
                let starting_offset = if truncate {
                    0
                } else {
                    file.metadata().map(|m| m.len()).unwrap_or(0)
                };
                registry
                    .slot_mut(dest)
                    .install(file, new_path, buffering, starting_offset);
                Ok(())
            }
            Err(CollectorError::LogfileOpen { path, source }) => {
                let transient = matches!(
                    source.raw_os_error(),
                    Some(code) if code == libc::EMFILE || code == libc::ENFILE
                );
                if !transient {
                    self.disabled[dest.index()] = true;
                }
                Err(CollectorError::LogfileOpen { path, source })
            }
            Err(other) => Err(other),
        }
    }
}

/// Time remaining until `target`, clamped to zero, for use as a `nix::poll`
/// timeout.
pub fn duration_until(target: DateTime<Local>) -> Duration {
    target
        .signed_duration_since(Local::now())
        .to_std()
        .unwrap_or(Duration::from_secs(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn filename_gets_dest_suffix_substituted() {
        let now = local(2026, 7, 28, 10, 0, 0);
        let name = compute_filename("logcollectord-%Y-%m-%d.log", now, DestKind::Csv, None);
        assert_eq!(name, "logcollectord-2026-07-28.csv");
    }

    #[test]
    fn audit_filename_gets_collector_index_tag() {
        let now = local(2026, 7, 28, 10, 0, 0);
        let name = compute_filename("logcollectord-%Y-%m-%d.log", now, DestKind::Audit, Some(2));
        assert_eq!(name, "logcollectord-2026-07-28_2.audit.log");
    }

    #[test]
    fn primary_collector_audit_filename_has_no_tag() {
        let now = local(2026, 7, 28, 10, 0, 0);
        let name = compute_filename("logcollectord-%Y-%m-%d.log", now, DestKind::Audit, Some(0));
        assert_eq!(name, "logcollectord-2026-07-28.audit.log");
    }

    #[test]
    fn next_rotation_time_aligns_to_midnight_multiples() {
        let now = local(2026, 7, 28, 10, 30, 0);
        let next = next_rotation_time(now, Duration::from_secs(24 * 60 * 60));
        assert_eq!(next, local(2026, 7, 29, 0, 0, 0));
    }

    #[test]
    fn next_rotation_time_with_short_age_steps_past_now() {
        let now = local(2026, 7, 28, 10, 30, 0);
        let next = next_rotation_time(now, Duration::from_secs(3600));
        assert!(next > now);
        assert_eq!((next - now).num_seconds() <= 3600, true);
    }

    #[test]
    fn reenable_all_clears_latches() {
        let mut engine = RotationEngine::default();
        engine.disabled[DestKind::Csv.index()] = true;
        engine.reenable_all();
        assert!(!engine.is_disabled(DestKind::Csv));
    }
}
