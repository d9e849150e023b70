//! Shared logging init for the `virt-driver` workspace.

pub mod logging;

pub use logging::{emoji, init, init_logging, init_logging_json, Loggable, TimedOperation};
