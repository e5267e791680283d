/*
 * Boundary between the host library manager and the ledger. The host reports
 * each primary file it moved or copied and finally that the session is
 * ending; the adapter turns those notifications into ledger records and the
 * final flush. The ledger sits behind a mutex so that a host delivering events
 * from several threads still records them one at a time.
 */
use super::config::CategoryTable;
use super::ledger::{LedgerError, OperationLedger};
use super::models::{Action, FlushReport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// A host notification, in the shape used by event scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    ItemMoved {
        source: PathBuf,
        destination: PathBuf,
    },
    ItemCopied {
        source: PathBuf,
        destination: PathBuf,
    },
    SessionEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Recorded,
    Rejected(LedgerError),
    Flushed(FlushReport),
}

pub struct EventAdapter {
    ledger: Mutex<OperationLedger>,
}

impl EventAdapter {
    pub fn new(ledger: OperationLedger) -> Self {
        EventAdapter {
            ledger: Mutex::new(ledger),
        }
    }

    pub fn with_defaults(categories: Arc<CategoryTable>) -> Self {
        Self::new(OperationLedger::with_defaults(categories))
    }

    // A panic while holding the lock cannot leave the ledger half-updated, so poisoning is ignored.
    fn ledger(&self) -> MutexGuard<'_, OperationLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_item_moved(&self, source: &Path, destination: &Path) -> Result<(), LedgerError> {
        self.record(source, Action::Move, destination)
    }

    pub fn on_item_copied(&self, source: &Path, destination: &Path) -> Result<(), LedgerError> {
        self.record(source, Action::Copy, destination)
    }

    /*
     * Flushes all queued work. Safe to call more than once; later calls
     * without new events return an empty report.
     */
    pub fn on_session_end(&self) -> FlushReport {
        log::debug!("EventAdapter: Session ending, flushing companion work.");
        self.ledger().flush_all()
    }

    pub fn dispatch(&self, event: &HostEvent) -> DispatchOutcome {
        let result = match event {
            HostEvent::ItemMoved {
                source,
                destination,
            } => self.on_item_moved(source, destination),
            HostEvent::ItemCopied {
                source,
                destination,
            } => self.on_item_copied(source, destination),
            HostEvent::SessionEnd => return DispatchOutcome::Flushed(self.on_session_end()),
        };
        match result {
            Ok(()) => DispatchOutcome::Recorded,
            Err(e) => DispatchOutcome::Rejected(e),
        }
    }

    fn record(&self, source: &Path, action: Action, destination: &Path) -> Result<(), LedgerError> {
        log::trace!("EventAdapter: Item {action}: {source:?} -> {destination:?}");
        let result = self.ledger().record_primary(source, action, destination);
        if let Err(LedgerError::NoParentDirectory(path)) = &result {
            log::warn!("EventAdapter: Ignoring event for {path:?}, it has no parent directory.");
        }
        result
    }
}
