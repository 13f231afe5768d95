//! Command line interface
//!
//! Argument parsing with environment overrides, and the runner that maps
//! each subcommand onto the library.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
