//! Core library for the serial_daq application.
//!
//! This library contains the acquisition pipeline for serially attached
//! measurement devices: device discovery, per-channel acquisition workers,
//! frame parsing, the per-channel plot store and the coordinator that wires
//! them together. The `serial_daq` binary is a thin headless front end over
//! [`coordinator::AcquisitionCoordinator`].

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod discovery;
pub mod error;
pub mod instrument;
pub mod log_capture;
pub mod messages;
pub mod session;
pub mod store;
pub mod worker;

pub use channel::ChannelType;
pub use config::Settings;
pub use coordinator::AcquisitionCoordinator;
pub use error::{AppResult, DaqError};
pub use store::{ChannelSeriesStore, PlotSurface, RecordingSurface};
pub use worker::{AcquisitionWorker, WorkerState};
