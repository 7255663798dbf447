//! Meta-info datafile (spec §4.5): a small text file recording the current
//! filename of each open destination, so that a process external to the
//! collector (e.g. a log-shipping sidecar) can discover "what file is being
//! written to right now" without inotify-watching the whole directory.
//!
//! Rewritten atomically: written to `<path>.tmp` then renamed over `path`, so
//! a reader never observes a half-written file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::destination::{DestinationRegistry, DestKind};
use crate::error::{CollectorError, Result};

/// Name of the meta-info file, fixed relative to the log directory.
pub const METAINFO_FILENAME: &str = "current_logfiles";

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Rewrite the meta-info datafile at `path` to reflect the currently open
/// destinations in `registry`. One line per open destination:
/// `<metainfo_kind> <filename>`. If no destination is open (shouldn't happen
/// given the TEXT-always-open invariant, but handled defensively since this
/// runs during startup before TEXT is installed), the file is removed
/// instead of left stale.
pub fn rewrite(path: &Path, registry: &DestinationRegistry) -> Result<()> {
    let tmp = tmp_path(path);

    let mut lines = Vec::new();
    for dest in DestKind::ALL {
        let slot = registry.slot(dest);
        if let Some(filename) = slot.filename() {
            lines.push(format!("{} {}", dest.metainfo_kind(), filename.display()));
        }
    }

    if lines.is_empty() {
        let _ = fs::remove_file(path);
        return Ok(());
    }

    let mut body = lines.join("\n");
    body.push('\n');

    let mut file = fs::File::create(&tmp).map_err(CollectorError::MetaInfoWrite)?;
    file.write_all(body.as_bytes())
        .map_err(CollectorError::MetaInfoWrite)?;
    file.sync_all().map_err(CollectorError::MetaInfoWrite)?;
    drop(file);

    fs::rename(&tmp, path).map_err(CollectorError::MetaInfoWrite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{Buffering, FileSlot};

    #[test]
    fn writes_one_line_per_open_destination() {
        let dir = tempfile::tempdir().unwrap();
        let meta_path = dir.path().join(METAINFO_FILENAME);

        let mut registry = DestinationRegistry::default();
        let text_path = dir.path().join("text.log");
        let file = FileSlot::open(&text_path, false, 0o600).unwrap();
        registry
            .slot_mut(DestKind::Text)
            .install(file, text_path.clone(), Buffering::Line, 0);

        rewrite(&meta_path, &registry).unwrap();

        let contents = fs::read_to_string(&meta_path).unwrap();
        assert_eq!(
            contents,
            format!("stderr {}\n", text_path.display())
        );
        assert!(!tmp_path(&meta_path).exists());
    }

    #[test]
    fn no_open_destination_removes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta_path = dir.path().join(METAINFO_FILENAME);
        fs::write(&meta_path, "stale\n").unwrap();

        let registry = DestinationRegistry::default();
        rewrite(&meta_path, &registry).unwrap();

        assert!(!meta_path.exists());
    }
}
