//! CLI output formatting

pub mod display;

pub use display::{finding_line, render_report};
