//! # kdbg Utilities
//!
//! Shared helpers for the kdbg workspace.
//!
//! Currently this is the logging bootstrap: `tracing-subscriber` layers that
//! keep stdout free for command output.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_to_file, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
