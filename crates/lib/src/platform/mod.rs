//! Platform-specific defaults.

pub mod paths;
