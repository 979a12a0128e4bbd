//! Stable exit codes for the harness CLI.

/// Every executed fixture passed on every requested kernel.
pub const OK: i32 = 0;
/// At least one fixture failed.
pub const TEST_FAILURES: i32 = 1;
/// Manifest resolution, kernel provisioning, or another unhandled error.
pub const FATAL: i32 = 2;
