//! Anvil: a target-graph build runner.
//!
//! Named build steps declare their dependencies and run conditions in a
//! TOML build file. The executor orders a goal's transitive dependencies,
//! runs them one at a time, skips targets whose condition is false and stops
//! at the first failure. Compiled Windows binaries can be stamped with a
//! version resource through the `verstamp` crate.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod actions;
pub mod config;
pub mod context;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod pipeline;
