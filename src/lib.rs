//! covctl library crate — re-exports for integration tests.
//!
//! The primary interface is the `covctl` binary. This lib.rs exposes the
//! pipeline modules so that integration tests can exercise the artifact
//! directories, merge engine, and renderers directly without going through
//! the CLI.

pub mod artifacts;
pub mod clean;
pub mod config;
pub mod merge;
pub mod objects;
pub mod report;
pub mod run;
pub mod telemetry;
pub mod tools;
