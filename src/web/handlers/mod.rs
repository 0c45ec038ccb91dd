//! HTTP request handlers for the stepwise web API.

pub mod control;
pub mod lines;
pub mod sessions;
