/*
 * Keeps companion files (cue sheets, rip logs, artwork folders) with a
 * primary media file while an external library manager moves or copies it.
 * Moves and copies are recorded per source directory during a session and
 * applied once, at session end.
 */
pub mod core;
