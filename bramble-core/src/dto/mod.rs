//! Data Transfer Objects
//!
//! Summaries served by the operator API and printed by the CLI.

pub mod execution;
pub mod pipeline;
