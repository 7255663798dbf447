//! Destination registry (C3): the fixed enumeration of destination kinds,
//! and the open-file-handle-plus-filename slot for each of them.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::error::{CollectorError, Result};

/// The fixed enumeration of destination kinds. Not extensible at runtime:
/// every consumer of this type (the frame codec's flag bits, the rotation
/// engine's fixed processing order, the retention sweeper's family rules)
/// enumerates all five explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestKind {
    Text,
    Csv,
    Json,
    Audit,
    Slow,
}

impl DestKind {
    /// Processing order used everywhere a fixed order matters (rotation,
    /// `meta-info` rewrite).
    pub const ALL: [DestKind; 5] = [
        DestKind::Text,
        DestKind::Csv,
        DestKind::Json,
        DestKind::Audit,
        DestKind::Slow,
    ];

    /// Filename suffix appended after the timestamp pattern.
    pub fn suffix(self) -> &'static str {
        match self {
            DestKind::Text => ".log",
            DestKind::Csv => ".csv",
            DestKind::Json => ".json",
            DestKind::Audit => ".audit.log",
            DestKind::Slow => ".slow.log",
        }
    }

    /// The keyword used for this destination in the meta-info datafile.
    pub fn metainfo_kind(self) -> &'static str {
        match self {
            DestKind::Text => "stderr",
            DestKind::Csv => "csvlog",
            DestKind::Json => "jsonlog",
            DestKind::Audit => "auditlog",
            DestKind::Slow => "slowlog",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            DestKind::Text => 0,
            DestKind::Csv => 1,
            DestKind::Json => 2,
            DestKind::Audit => 3,
            DestKind::Slow => 4,
        }
    }
}

/// Whether writes to a destination's file go through a small (line-ish) or
/// large buffer before hitting the fd. Only [`DestKind::Audit`] can use
/// [`Buffering::Full`], controlled by `polar_enable_syslog_file_buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffering {
    Line,
    Full,
}

impl Buffering {
    /// Internal `BufWriter` capacity. This only smooths out syscalls; the
    /// actual line-vs-full distinction comes from whether [`FileSlot::write`]
    /// flushes after every call.
    fn capacity(self) -> usize {
        match self {
            Buffering::Line => 8 * 1024,
            Buffering::Full => 64 * 1024,
        }
    }
}

/// An open destination file plus the filename it was opened under.
///
/// Invariant: `writer.is_some() == filename.is_some()`.
#[derive(Debug)]
pub struct FileSlot {
    writer: Option<BufWriter<File>>,
    filename: Option<PathBuf>,
    buffering: Buffering,
    /// Logical write offset, tracked explicitly rather than derived from
    /// `File::metadata` so that size-based rotation checks don't need to
    /// flush a possibly-buffered writer first.
    offset: u64,
}

impl Default for FileSlot {
    fn default() -> Self {
        FileSlot {
            writer: None,
            filename: None,
            buffering: Buffering::Line,
            offset: 0,
        }
    }
}

impl FileSlot {
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Open `path` in append (`truncate = false`) or truncate (`truncate =
    /// true`) mode, with the given file mode and buffering. Closes whatever
    /// was previously open in this slot first... no: the caller (rotation
    /// engine) is responsible for deciding whether to close the previous
    /// handle, since on failure the previous handle must be left untouched.
    ///
    /// `mode` always gets owner-write forced on (spec §6), the same way the
    /// original's `logfile_open` ORs in `S_IWUSR` regardless of
    /// `Log_file_mode`: a mode lacking it would still let the collector
    /// create the file but then fail to reopen or truncate it on rotation.
    pub fn open(path: &Path, truncate: bool, mode: u32) -> Result<File> {
        let mode = mode | libc::S_IWUSR as u32;
        OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .mode(mode)
            .open(path)
            .map_err(|source| CollectorError::LogfileOpen {
                path: path.display().to_string(),
                source,
            })
    }

    /// Install a freshly opened file as this slot's current destination.
    /// `starting_offset` should be `0` for a truncated file, or the file's
    /// existing length when reopening an existing file in append mode.
    pub fn install(&mut self, file: File, filename: PathBuf, buffering: Buffering, starting_offset: u64) {
        self.writer = Some(BufWriter::with_capacity(buffering.capacity(), file));
        self.filename = Some(filename);
        self.buffering = buffering;
        self.offset = starting_offset;
    }

    pub fn close(&mut self) {
        self.writer = None;
        self.filename = None;
        self.offset = 0;
    }

    /// Write `payload` verbatim: no newline is appended, no framing is
    /// stripped. Byte-faithful per the collector's non-goal of content
    /// parsing.
    pub fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        if let Some(w) = &mut self.writer {
            w.write_all(payload)?;
            self.offset += payload.len() as u64;
            if self.buffering == Buffering::Line {
                // Mirrors the original's PG_IOLBF mode: every write is
                // pushed out immediately rather than waiting for the
                // buffer to fill.
                w.flush()?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(w) = &mut self.writer {
            w.flush()?;
        }
        Ok(())
    }
}

/// Maps each [`DestKind`] to its [`FileSlot`]. `TEXT` is special: it is
/// non-empty for the entire lifetime of a started collector, and every
/// `resolve` for a destination whose slot is empty falls back to it.
#[derive(Debug)]
pub struct DestinationRegistry {
    slots: [FileSlot; 5],
}

impl Default for DestinationRegistry {
    fn default() -> Self {
        DestinationRegistry {
            slots: Default::default(),
        }
    }
}

impl DestinationRegistry {
    pub fn slot(&self, dest: DestKind) -> &FileSlot {
        &self.slots[dest.index()]
    }

    pub fn slot_mut(&mut self, dest: DestKind) -> &mut FileSlot {
        &mut self.slots[dest.index()]
    }

    /// Write `payload` to `dest`'s file, degrading to `TEXT` when `dest`'s
    /// file isn't open. Never fails loudly: write errors are the caller's
    /// concern to report via the preserved-stderr escape hatch, not to
    /// propagate through the normal error channel (§4.3/§7: that would
    /// recurse through the collector's own logging path).
    pub fn write(&mut self, dest: DestKind, payload: &[u8]) -> io::Result<()> {
        let idx = if self.slots[dest.index()].is_open() {
            dest.index()
        } else {
            DestKind::Text.index()
        };
        self.slots[idx].write(payload)
    }

    pub fn flush_all(&mut self) -> io::Result<()> {
        for slot in &mut self.slots {
            slot.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopened_destination_falls_back_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = DestinationRegistry::default();
        let text_path = dir.path().join("text.log");
        let file = FileSlot::open(&text_path, false, 0o600).unwrap();
        let len = file.metadata().unwrap().len();
        reg.slot_mut(DestKind::Text).install(file, text_path.clone(), Buffering::Line, len);

        reg.write(DestKind::Csv, b"hello").unwrap();
        reg.flush_all().unwrap();

        assert_eq!(std::fs::read(&text_path).unwrap(), b"hello");
    }
}
