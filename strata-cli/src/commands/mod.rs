//! Command implementations for the Strata CLI
//!
//! Each command module provides a `run` function that executes the command logic.

pub mod build;
pub mod clean;
pub mod status;
