//! Upload size ceilings, checked on raw bytes before anything is compressed.

use bsync_index::ChangeEntry;
use tracing::warn;

use crate::error::{PackError, PackResult};

const MIB: u64 = 1024 * 1024;

pub const DEFAULT_PROJECT_LIMIT: u64 = 100 * MIB;
pub const DEFAULT_CHANGE_LIMIT: u64 = 50 * MIB;
pub const DEFAULT_WARN_RATIO: f64 = 0.8;

/// Outcome of a size check that did not reject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeVerdict {
    Ok,
    /// Above the warning threshold but within the limit.
    Warn { actual: u64, limit: u64 },
}

/// Enforces the full-project and change-set ceilings.
#[derive(Clone, Debug)]
pub struct SizeGuard {
    project_limit: u64,
    change_limit: u64,
    warn_ratio: f64,
}

impl SizeGuard {
    pub fn new(project_limit: u64, change_limit: u64, warn_ratio: f64) -> Self {
        Self {
            project_limit,
            change_limit,
            warn_ratio: warn_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn project_limit(&self) -> u64 {
        self.project_limit
    }

    pub fn change_limit(&self) -> u64 {
        self.change_limit
    }

    /// Check a full-project entry list.
    pub fn check_project(&self, entries: &[ChangeEntry]) -> PackResult<SizeVerdict> {
        let actual = raw_bytes(entries);
        if actual > self.project_limit {
            return Err(PackError::ProjectTooLarge {
                actual,
                limit: self.project_limit,
            });
        }
        Ok(self.verdict("project", actual, self.project_limit))
    }

    /// Check an incremental change set.
    pub fn check_change_batch(&self, entries: &[ChangeEntry]) -> PackResult<SizeVerdict> {
        let actual = raw_bytes(entries);
        if actual > self.change_limit {
            return Err(PackError::ChangeTooLarge {
                actual,
                limit: self.change_limit,
            });
        }
        Ok(self.verdict("change set", actual, self.change_limit))
    }

    fn verdict(&self, what: &str, actual: u64, limit: u64) -> SizeVerdict {
        if actual as f64 >= limit as f64 * self.warn_ratio && actual > 0 {
            warn!(actual, limit, "{what} is close to the upload limit");
            SizeVerdict::Warn { actual, limit }
        } else {
            SizeVerdict::Ok
        }
    }
}

impl Default for SizeGuard {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECT_LIMIT, DEFAULT_CHANGE_LIMIT, DEFAULT_WARN_RATIO)
    }
}

fn raw_bytes(entries: &[ChangeEntry]) -> u64 {
    entries.iter().filter(|e| e.is_save()).map(|e| e.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsync_types::{Digest, NormalizedPath};
    use std::path::PathBuf;

    fn save(path: &str, size: u64) -> ChangeEntry {
        ChangeEntry::save_file(
            NormalizedPath::parse(path).unwrap(),
            Digest::null(),
            size,
            PathBuf::from("/unused"),
        )
    }

    #[test]
    fn sixty_megabyte_change_exceeds_fifty_megabyte_ceiling() {
        let guard = SizeGuard::default();
        let entries = vec![save("a.bin", 40 * MIB), save("b.bin", 20 * MIB)];
        let err = guard.check_change_batch(&entries).unwrap_err();
        assert!(matches!(
            err,
            PackError::ChangeTooLarge { actual, limit } if actual == 60 * MIB && limit == 50 * MIB
        ));
        // The same bytes fit under the project ceiling.
        assert_eq!(
            guard.check_project(&entries).unwrap(),
            SizeVerdict::Ok
        );
    }

    #[test]
    fn warns_above_ratio() {
        let guard = SizeGuard::new(100, 50, 0.8);
        assert_eq!(guard.check_change_batch(&[save("a", 39)]).unwrap(), SizeVerdict::Ok);
        assert_eq!(
            guard.check_change_batch(&[save("a", 45)]).unwrap(),
            SizeVerdict::Warn { actual: 45, limit: 50 }
        );
        assert_eq!(
            guard.check_change_batch(&[save("a", 50)]).unwrap(),
            SizeVerdict::Warn { actual: 50, limit: 50 }
        );
    }

    #[test]
    fn project_limit_is_enforced() {
        let guard = SizeGuard::new(10, 5, 0.8);
        assert!(matches!(
            guard.check_project(&[save("a", 6), save("b", 5)]),
            Err(PackError::ProjectTooLarge { actual: 11, limit: 10 })
        ));
    }

    #[test]
    fn removals_do_not_count() {
        let guard = SizeGuard::new(10, 5, 0.8);
        let entries = vec![
            ChangeEntry::remove(NormalizedPath::parse("x").unwrap()),
            save("a", 1),
        ];
        assert_eq!(guard.check_change_batch(&entries).unwrap(), SizeVerdict::Ok);
    }
}
