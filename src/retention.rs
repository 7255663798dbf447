//! Retention sweeper (C5): caps how many rotated files accumulate per
//! destination family, grounded in `polar_remove_old_syslog_files`.
//!
//! Files are grouped into three families by how their name ends, not by
//! which destination produced them (CSV and JSON share the "default"
//! family alongside TEXT, matching the original's grouping by filename
//! suffix rather than by `LogDestination` bit): AUDIT (`.audit.log`), SLOW
//! (`.slow.log`), and everything else. Within a family, files beyond the
//! configured cap are unlinked starting with the lexicographically smallest
//! name, which for a timestamp-based naming pattern is also the oldest.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Family {
    Default,
    Audit,
    Slow,
}

fn classify(name: &str) -> Family {
    if name.ends_with(".audit.log") {
        Family::Audit
    } else if name.ends_with(".slow.log") {
        Family::Slow
    } else {
        Family::Default
    }
}

/// Per-family retention caps: `polar_max_log_files`, `polar_max_auditlog_files`,
/// and `polar_max_slowlog_files` (§6) are independent knobs, each capping its
/// own family. `None` mirrors a negative configured value: the family is
/// never swept.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionCaps {
    pub default: Option<u32>,
    pub audit: Option<u32>,
    pub slow: Option<u32>,
}

impl RetentionCaps {
    fn for_family(self, family: Family) -> Option<u32> {
        match family {
            Family::Default => self.default,
            Family::Audit => self.audit,
            Family::Slow => self.slow,
        }
    }
}

/// Scan `log_directory` and unlink the oldest files in each family that
/// exceeds that family's configured cap. Never touches the currently-open
/// filename for any destination (`keep`), even if it would otherwise be the
/// oldest in its family — this can happen right after a rotation whose new
/// name sorts before some stale files left by a clock change.
pub fn sweep(log_directory: &Path, caps: RetentionCaps, keep: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    let mut by_family: std::collections::BTreeMap<Family, Vec<PathBuf>> = std::collections::BTreeMap::new();

    let entries = match fs::read_dir(log_directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".tmp") || name == crate::metainfo::METAINFO_FILENAME {
            continue;
        }
        by_family.entry(classify(name)).or_default().push(path);
    }

    for (&family, files) in by_family.iter_mut() {
        let Some(max_per_family) = caps.for_family(family) else {
            continue;
        };
        files.sort();
        while files.len() as u32 > max_per_family {
            let victim = files.remove(0);
            if keep.iter().any(|k| k == &victim) {
                // Don't evict a file a destination is actively writing to;
                // leave it and let the next sweep re-evaluate once it's
                // been superseded by a later rotation.
                continue;
            }
            match fs::remove_file(&victim) {
                Ok(()) => removed.push(victim),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }

    Ok(removed)
}
