/*
 * This module consolidates the core logic for keeping companion files with
 * their primary media file. It re-exports the data model, the abstractions
 * (`ConfigManagerOperations`, `PatternMatcherOperations`, `FileOperations`)
 * with their concrete implementations, the destination resolver, the
 * operation ledger and the event adapter the host talks to.
 * End-to-end session scenarios are in `session_tests.rs`.
 */
pub mod checksum_utils;
pub mod config;
pub mod destination;
pub mod events;
pub mod file_ops;
pub mod ledger;
pub mod models;
pub mod path_utils;
pub mod pattern_matcher;


// Re-export key structures and enums
pub use models::{
    Action, ActionConflict, FlushFailure, FlushReport, MatchedEntry, PendingDirectoryOp,
    Relocation,
};

// Re-export config related items
pub use config::{
    Category, CategoryTable, CompanionConfig, ConfigError, ConfigManagerOperations,
    CoreConfigManager,
};

pub use destination::{DestinationResolver, PathTemplate, Placeholder, TemplateError};

pub use pattern_matcher::{
    CategoryPattern, CorePatternMatcher, MatcherError, PatternMatcherOperations,
};

pub use file_ops::{CoreFileOperations, EntryOperationError, FileOperations};

pub use ledger::{LedgerError, OperationLedger};

pub use events::{DispatchOutcome, EventAdapter, HostEvent};
