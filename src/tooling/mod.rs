//! CLI Tooling
//!
//! Command-line surface for all APM operations: the clap command tree, the
//! dispatcher, text formatting, and watch mode.

pub mod cli;
pub mod format;
pub mod watch;
