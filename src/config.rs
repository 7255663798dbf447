//! Collector configuration (spec §6) and reload-diff detection.

use std::path::PathBuf;
use std::time::Duration;

use crate::destination::DestKind;

/// Flat configuration record, populated either programmatically by an
/// embedding supervisor or from CLI flags (`src/bin/logcollectord.rs`).
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    /// Whether the collector should run at all. An embedding supervisor that
    /// flips this off mid-run is expected to shut the collector down rather
    /// than call into this crate; it exists here only to mirror the
    /// original's `Logging_collector` GUC.
    pub logging_collector: bool,
    pub log_directory: PathBuf,
    /// strftime-style pattern, e.g. `"postgresql-%Y-%m-%d_%H%M%S.log"`.
    pub log_filename: String,
    pub log_rotation_age: Option<Duration>,
    pub log_rotation_size: Option<u64>,
    pub log_truncate_on_rotation: bool,
    pub log_file_mode: u32,
    /// Which destinations are active. `DestKind::Text` is implicitly always
    /// enabled regardless of this set (§4.1 invariant).
    pub log_destination: Vec<DestKind>,
    /// `polar_enable_syslog_file_buffer`: full buffering for AUDIT instead
    /// of line buffering.
    pub enable_audit_file_buffer: bool,
    /// `polar_enable_multi_syslogger`: spawn N collectors (C8) instead of 1.
    pub enable_multi_collector: bool,
    pub multi_collector_count: usize,
    /// `polar_max_log_files`: cap on the default (TEXT/CSV/JSON) family;
    /// negative (modeled as `None`) disables the sweep for that family.
    pub max_log_files: Option<u32>,
    /// `polar_max_auditlog_files`: independent cap on the AUDIT family.
    pub max_auditlog_files: Option<u32>,
    /// `polar_max_slowlog_files`: independent cap on the SLOW family.
    pub max_slowlog_files: Option<u32>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            logging_collector: true,
            log_directory: PathBuf::from("log"),
            log_filename: "logcollectord-%Y-%m-%d_%H%M%S.log".to_string(),
            log_rotation_age: Some(Duration::from_secs(24 * 60 * 60)),
            log_rotation_size: Some(10 * 1024 * 1024),
            log_truncate_on_rotation: false,
            log_file_mode: 0o600,
            log_destination: vec![DestKind::Text],
            enable_audit_file_buffer: false,
            enable_multi_collector: false,
            multi_collector_count: 1,
            max_log_files: None,
            max_auditlog_files: None,
            max_slowlog_files: None,
        }
    }
}

/// The subset of configuration changes that require the rotation engine to
/// act on reload, mirroring `SysLoggerMain`'s inline comparisons against
/// `currentLogDir`/`currentLogFilename`/`currentLogRotationAge` (spec §4.6
/// step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadDiff {
    /// Directory or filename pattern changed: every open destination must be
    /// rotated immediately regardless of age/size triggers.
    pub force_rotation: bool,
    /// Destination set changed: newly-enabled destinations must be opened,
    /// newly-disabled ones closed.
    pub destinations_changed: bool,
}

impl ReloadDiff {
    pub fn requires_action(self) -> bool {
        self.force_rotation || self.destinations_changed
    }
}

impl LoggerConfig {
    /// Compute what a reload from `self` to `new` requires the rotation
    /// engine to do.
    pub fn diff_requires_rotation(&self, new: &LoggerConfig) -> ReloadDiff {
        ReloadDiff {
            force_rotation: self.log_directory != new.log_directory
                || self.log_filename != new.log_filename,
            destinations_changed: self.log_destination != new.log_destination
                || self.enable_audit_file_buffer != new.enable_audit_file_buffer,
        }
    }

    pub fn destination_enabled(&self, dest: DestKind) -> bool {
        dest == DestKind::Text || self.log_destination.contains(&dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_only_text() {
        let cfg = LoggerConfig::default();
        assert!(cfg.destination_enabled(DestKind::Text));
        assert!(!cfg.destination_enabled(DestKind::Csv));
    }

    #[test]
    fn directory_change_forces_rotation() {
        let a = LoggerConfig::default();
        let mut b = a.clone();
        b.log_directory = PathBuf::from("other");
        let diff = a.diff_requires_rotation(&b);
        assert!(diff.force_rotation);
        assert!(diff.requires_action());
    }

    #[test]
    fn unrelated_change_requires_no_action() {
        let a = LoggerConfig::default();
        let mut b = a.clone();
        b.log_rotation_size = Some(1);
        let diff = a.diff_requires_rotation(&b);
        assert!(!diff.requires_action());
    }

    #[test]
    fn destination_set_change_is_detected() {
        let a = LoggerConfig::default();
        let mut b = a.clone();
        b.log_destination.push(DestKind::Audit);
        let diff = a.diff_requires_rotation(&b);
        assert!(diff.destinations_changed);
        assert!(!diff.force_rotation);
    }
}
