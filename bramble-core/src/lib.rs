//! Bramble Core
//!
//! Core types and abstractions for the Bramble execution reconciler.
//!
//! This crate contains:
//! - Domain types: Execution and Pipeline custom resources, unit outcomes
//! - Naming: deterministic child resource names derived from an execution
//! - DTOs: Summaries shared by the operator API and the CLI

pub mod domain;
pub mod dto;
pub mod naming;
