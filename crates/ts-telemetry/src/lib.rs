//! Logging setup for the trial-sync binary and its tests.
//!
//! Human-readable output for interactive runs, JSON lines for the job runner.

pub mod logging;
