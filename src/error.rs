//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the acquisition pipeline.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can occur, from configuration issues to device I/O.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from the `config` crate (file parsing, type mismatches).
//! - **`Configuration`**: Semantic errors in otherwise well-formed settings, caught by
//!   `Settings::validate`.
//! - **`UnsupportedDevice`**: A channel was bound but no device family is registered for it.
//!   This is a configuration error and is fatal to that worker only.
//! - **`DeviceOpen`** / **`SerialPort`** / **`SerialUnexpectedEof`**: Device I/O failures.
//!   Open failures are returned from `bind`; read failures end the worker loop and are
//!   surfaced as events.
//! - **`InvalidTransition`**: A lifecycle operation was requested from a state that does
//!   not allow it (e.g. `start` on an unbound worker).
//! - **`SessionActive`** / **`Session`** / **`Serialization`**: Persisted session errors.
//!
//! Malformed frames are not errors at all: the parser rejects them with `None`.

use crate::channel::ChannelType;
use crate::worker::WorkerState;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No device family configured for channel {0}")]
    UnsupportedDevice(ChannelType),

    #[error("Failed to open device '{path}': {details}")]
    DeviceOpen { path: String, details: String },

    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("Serial port not connected")]
    SerialPortNotConnected,

    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Cannot {operation} {channel} worker in state {state}")]
    InvalidTransition {
        channel: ChannelType,
        state: WorkerState,
        operation: &'static str,
    },

    #[error("Session data cannot be loaded while acquisition is running")]
    SessionActive,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DaqError {
    /// Whether the error is a configuration problem rather than a runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DaqError::Config(_) | DaqError::Configuration(_) | DaqError::UnsupportedDevice(_)
        )
    }
}
