//! Shared test utilities for stepwise
//!
//! - Git repository fixtures
//! - A file-backed recorder that runs scripted debug sessions

pub mod git_fixtures;
pub mod recorder;
