/*
 * The operation ledger batches companion work for one host session. Every
 * "primary file moved/copied" event only records intent keyed by the source
 * directory; the file system is touched once, at `flush_all`, which scans each
 * pending directory a single time using the latest primary destination seen
 * for it, resolves destinations, applies the action and prunes emptied
 * directories. Per-entry failures are collected into the `FlushReport` and
 * never abort the flush.
 */
use super::config::CategoryTable;
use super::destination::DestinationResolver;
use super::file_ops::{CoreFileOperations, FileOperations};
use super::models::{
    Action, ActionConflict, FlushFailure, FlushReport, PendingDirectoryOp, Relocation,
};
use super::path_utils;
use super::pattern_matcher::{CorePatternMatcher, PatternMatcherOperations};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    ActionConflict(ActionConflict),
    NoParentDirectory(PathBuf),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::ActionConflict(conflict) => write!(f, "Action conflict: {conflict}"),
            LedgerError::NoParentDirectory(p) => {
                write!(f, "Primary file path {p:?} has no parent directory")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

pub type Result<T> = std::result::Result<T, LedgerError>;

pub struct OperationLedger {
    categories: Arc<CategoryTable>,
    matcher: Arc<dyn PatternMatcherOperations>,
    file_ops: Arc<dyn FileOperations>,
    // First-recorded order; `index` maps a source directory to its slot.
    pending: Vec<PendingDirectoryOp>,
    index: HashMap<PathBuf, usize>,
    conflicts: Vec<ActionConflict>,
}

impl OperationLedger {
    pub fn new(
        categories: Arc<CategoryTable>,
        matcher: Arc<dyn PatternMatcherOperations>,
        file_ops: Arc<dyn FileOperations>,
    ) -> Self {
        OperationLedger {
            categories,
            matcher,
            file_ops,
            pending: Vec::new(),
            index: HashMap::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn with_defaults(categories: Arc<CategoryTable>) -> Self {
        Self::new(
            categories,
            Arc::new(CorePatternMatcher::new()),
            Arc::new(CoreFileOperations::new()),
        )
    }

    pub fn pending_directories(&self) -> impl Iterator<Item = &PendingDirectoryOp> {
        self.pending.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.conflicts.is_empty()
    }

    /*
     * Upserts the pending work for `source_dir`. A later event for the same
     * directory replaces the primary destination. An event with the other
     * action is a conflict: the first action stays, the event is otherwise
     * ignored and the conflict is reported both to the caller and in the next
     * flush report.
     */
    pub fn record(
        &mut self,
        source_dir: &Path,
        action: Action,
        primary_destination: &Path,
    ) -> Result<()> {
        if let Some(&slot) = self.index.get(source_dir) {
            let existing = &mut self.pending[slot];
            if existing.action != action {
                let conflict = ActionConflict {
                    directory: source_dir.to_path_buf(),
                    kept: existing.action,
                    rejected: action,
                };
                log::warn!("OperationLedger: {conflict}");
                self.conflicts.push(conflict.clone());
                return Err(LedgerError::ActionConflict(conflict));
            }
            log::trace!(
                "OperationLedger: Updating {source_dir:?} ({action}) with destination {primary_destination:?}."
            );
            existing.primary_destination = primary_destination.to_path_buf();
            return Ok(());
        }

        log::debug!(
            "OperationLedger: Queued {action} of companions in {source_dir:?} (primary -> {primary_destination:?})."
        );
        self.index.insert(source_dir.to_path_buf(), self.pending.len());
        self.pending.push(PendingDirectoryOp::new(
            source_dir.to_path_buf(),
            action,
            primary_destination.to_path_buf(),
        ));
        Ok(())
    }

    /*
     * Records an event for a primary file. The source directory is derived
     * from `primary_source`, which is also excluded from the directory scan,
     * even when the event itself is rejected as a conflict.
     */
    pub fn record_primary(
        &mut self,
        primary_source: &Path,
        action: Action,
        primary_destination: &Path,
    ) -> Result<()> {
        let source_dir = primary_source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| LedgerError::NoParentDirectory(primary_source.to_path_buf()))?;
        let recorded = self.record(source_dir, action, primary_destination);
        if let Some(&slot) = self.index.get(source_dir) {
            self.pending[slot]
                .primary_sources
                .insert(primary_source.to_path_buf());
        }
        recorded
    }

    /*
     * Applies all queued work and empties the ledger. Directories are handled
     * in the order they were first recorded. Calling this again without new
     * records does nothing and returns an empty report.
     */
    pub fn flush_all(&mut self) -> FlushReport {
        let pending = std::mem::take(&mut self.pending);
        self.index.clear();
        let mut report = FlushReport {
            conflicts: std::mem::take(&mut self.conflicts),
            ..FlushReport::default()
        };

        if pending.is_empty() {
            log::trace!("OperationLedger: Nothing to flush.");
            return report;
        }

        log::debug!(
            "OperationLedger: Flushing {} pending directories.",
            pending.len()
        );
        for op in &pending {
            self.flush_directory(op, &mut report);
        }

        log::info!(
            "OperationLedger: Flush finished: {} relocated, {} failed.",
            report.relocated.len(),
            report.failures.len()
        );
        report
    }

    fn flush_directory(&self, op: &PendingDirectoryOp, report: &mut FlushReport) {
        report.directories_scanned += 1;
        let entries = match self
            .matcher
            .match_entries(&op.source_dir, &self.categories, &op.primary_sources)
        {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("OperationLedger: Skipping {:?}: {e}", op.source_dir);
                report.failures.push(FlushFailure::DirectoryUnreadable {
                    directory: op.source_dir.clone(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        // Destinations handed out during this directory's flush, so two companions never share one.
        let mut claimed: HashSet<PathBuf> = HashSet::new();

        for entry in &entries {
            let Some(category) = self.categories.get(&entry.category) else {
                log::error!(
                    "OperationLedger: {:?} matched unknown category '{}'.",
                    entry.path,
                    entry.category
                );
                continue;
            };

            let resolved = DestinationResolver::resolve(category, entry, &op.primary_destination);
            if resolved == entry.path {
                log::trace!(
                    "OperationLedger: {:?} is already in place, skipping.",
                    entry.path
                );
                continue;
            }
            let destination = path_utils::unique_destination_with(&resolved, entry.is_dir, |p| {
                claimed.contains(p) || p.symlink_metadata().is_ok()
            });
            claimed.insert(destination.clone());

            let outcome = match op.action {
                Action::Move => self.file_ops.move_entry(&entry.path, &destination),
                Action::Copy => self.file_ops.copy_entry(&entry.path, &destination),
            };

            match outcome {
                Ok(()) => {
                    log::info!(
                        "OperationLedger: {} [{}] {:?} -> {destination:?}",
                        op.action,
                        entry.category,
                        entry.path
                    );
                    report.relocated.push(Relocation {
                        source: entry.path.clone(),
                        destination,
                        category: entry.category.clone(),
                        action: op.action,
                    });
                }
                Err(e) => {
                    log::error!(
                        "OperationLedger: Could not {} {:?} to {destination:?}: {e}",
                        op.action,
                        entry.path
                    );
                    report.failures.push(FlushFailure::EntryOperationFailed {
                        source: entry.path.clone(),
                        destination,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if op.action == Action::Move {
            match self.file_ops.remove_dir_if_empty(&op.source_dir) {
                Ok(true) => report.removed_directories.push(op.source_dir.clone()),
                Ok(false) => {}
                Err(e) => log::warn!(
                    "OperationLedger: Could not remove emptied directory {:?}: {e}",
                    op.source_dir
                ),
            }
        }
    }
}
