//! Core domain types
//!
//! These types mirror the cluster objects the operator reads and writes.
//! They are shared between the operator (which reconciles them), the
//! cluster client (which serializes them) and the CLI (which displays them).

pub mod execution;
pub mod meta;
pub mod outcome;
pub mod pipeline;
