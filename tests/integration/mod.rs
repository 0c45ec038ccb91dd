//! Integration tests for stepwise
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod query_api;
pub mod source_provenance;
pub mod stepping_flow;
