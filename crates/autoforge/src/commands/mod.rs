//! Command dispatch: one module per CLI subcommand, each exposing an `execute_*`
//! entry point taking parsed args plus the loaded process [`crate::config::Loaded`].

pub mod build;
pub mod solution;
pub mod vars;
