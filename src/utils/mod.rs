//! Utility functions
//!
//! Logging setup shared by applications and test harnesses.

pub mod logging;

pub use logging::init_logging;
