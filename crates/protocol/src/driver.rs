//! The interpreter-side half of the protocol.
//!
//! The driver is a Python program passed to the interpreter with `-c`. It
//! owns the persistent cell namespace and translates cell execution into
//! [`Event`](crate::messages::Event) lines.

/// Source of the Python driver program.
pub const DRIVER_SOURCE: &str = include_str!("../driver/kernel_driver.py");

/// Interpreter arguments that run the driver.
///
/// `-u` keeps the interpreter's own stdio unbuffered so diagnostics on
/// stderr arrive promptly; protocol lines are flushed explicitly.
pub fn driver_args() -> [&'static str; 3] {
    ["-u", "-c", DRIVER_SOURCE]
}
