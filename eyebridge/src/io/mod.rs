//! I/O helpers for engine invocations.

pub mod config;
pub mod process;
pub mod resources;
