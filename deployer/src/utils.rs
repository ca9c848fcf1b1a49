//! Utility functions

/// Version string for `--version`: package version, git hash, build time
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Format a duration in seconds with one decimal, as used in step lines
pub fn format_secs(duration: std::time::Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}
