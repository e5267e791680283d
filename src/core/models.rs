/*
 * Plain data types shared by the matcher, the destination resolver and the
 * operation ledger. Nothing in here touches the file system; these are the
 * values that flow between the components during one host session.
 */
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;

// What the host did with the primary file, replicated for its companions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Move,
    Copy,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Move => write!(f, "move"),
            Action::Copy => write!(f, "copy"),
        }
    }
}

/*
 * A directory entry that matched one of the configured categories.
 * Produced fresh by every scan and never persisted.
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchedEntry {
    pub path: PathBuf,
    pub category: String,
    pub is_dir: bool,
}

impl MatchedEntry {
    pub fn new(path: PathBuf, category: impl Into<String>, is_dir: bool) -> Self {
        MatchedEntry {
            path,
            category: category.into(),
            is_dir,
        }
    }

    /// Base name of the matched entry, empty for a path without one.
    pub fn base_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_default()
    }
}

/*
 * Queued work for one source directory. Created by the first event for that
 * directory, updated by later ones and consumed exactly once by a flush.
 * `primary_destination` always holds the most recently observed destination,
 * while `primary_sources` collects every primary file recorded so none of them
 * is ever treated as its own companion.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDirectoryOp {
    pub source_dir: PathBuf,
    pub action: Action,
    pub primary_destination: PathBuf,
    pub primary_sources: HashSet<PathBuf>,
}

impl PendingDirectoryOp {
    pub fn new(source_dir: PathBuf, action: Action, primary_destination: PathBuf) -> Self {
        PendingDirectoryOp {
            source_dir,
            action,
            primary_destination,
            primary_sources: HashSet::new(),
        }
    }
}

// A companion that was successfully relocated during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    pub action: Action,
}

// Same source directory recorded with both actions in one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionConflict {
    pub directory: PathBuf,
    pub kept: Action,
    pub rejected: Action,
}

impl fmt::Display for ActionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} recorded for both {} and {}; kept {}",
            self.directory.display(),
            self.kept,
            self.rejected,
            self.kept
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushFailure {
    DirectoryUnreadable {
        directory: PathBuf,
        reason: String,
    },
    EntryOperationFailed {
        source: PathBuf,
        destination: PathBuf,
        reason: String,
    },
}

impl fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushFailure::DirectoryUnreadable { directory, reason } => {
                write!(f, "could not read {}: {reason}", directory.display())
            }
            FlushFailure::EntryOperationFailed {
                source,
                destination,
                reason,
            } => write!(
                f,
                "could not relocate {} to {}: {reason}",
                source.display(),
                destination.display()
            ),
        }
    }
}

/*
 * Aggregate outcome of a flush. A flush never aborts on a single bad entry,
 * so everything that went wrong is collected here for post-session diagnostics.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub directories_scanned: usize,
    pub relocated: Vec<Relocation>,
    pub failures: Vec<FlushFailure>,
    pub conflicts: Vec<ActionConflict>,
    pub removed_directories: Vec<PathBuf>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.conflicts.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.directories_scanned == 0
            && self.relocated.is_empty()
            && self.failures.is_empty()
            && self.conflicts.is_empty()
            && self.removed_directories.is_empty()
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scanned {} director{}, relocated {} companion{}, {} failure{}.",
            self.directories_scanned,
            if self.directories_scanned == 1 { "y" } else { "ies" },
            self.relocated.len(),
            if self.relocated.len() == 1 { "" } else { "s" },
            self.failures.len(),
            if self.failures.len() == 1 { "" } else { "s" },
        )?;
        for relocation in &self.relocated {
            writeln!(
                f,
                "  {} [{}] {} -> {}",
                relocation.action,
                relocation.category,
                relocation.source.display(),
                relocation.destination.display()
            )?;
        }
        for conflict in &self.conflicts {
            writeln!(f, "  conflict: {conflict}")?;
        }
        for failure in &self.failures {
            writeln!(f, "  failed: {failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_entry_base_name() {
        let entry = MatchedEntry::new(PathBuf::from("/music/album/scans"), "artwork", true);
        assert_eq!(entry.base_name(), "scans");
    }

    #[test]
    fn test_action_deserializes_lowercase() {
        let action: Action = serde_json::from_str("\"copy\"").unwrap();
        assert_eq!(action, Action::Copy);
        assert_eq!(action.to_string(), "copy");
    }

    #[test]
    fn test_flush_report_default_is_empty_and_clean() {
        let report = FlushReport::default();
        assert!(report.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_flush_report_display_lists_failures() {
        let report = FlushReport {
            directories_scanned: 1,
            failures: vec![FlushFailure::EntryOperationFailed {
                source: PathBuf::from("/src/file.cue"),
                destination: PathBuf::from("/dst/file.cue"),
                reason: "permission denied".to_string(),
            }],
            ..FlushReport::default()
        };

        let text = report.to_string();

        assert!(!report.is_clean());
        assert!(text.contains("Scanned 1 directory"));
        assert!(text.contains("failed: could not relocate /src/file.cue"));
    }
}
