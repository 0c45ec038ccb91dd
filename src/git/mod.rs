//! Git operations module

mod source_control;

pub use source_control::{GitCli, SourceControl};
