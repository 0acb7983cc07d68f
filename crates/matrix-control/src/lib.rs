//! Matrix Controller Engine
//!
//! This crate drives a Binary B-100/300 HDMI matrix over RS-232 and keeps a
//! cached copy of its routing and power state.
//!
//! # Architecture
//!
//! - **Transport**: owns the serial line. One FIFO gate admits a single
//!   write (or write + read) sequence at a time, and every plain write is
//!   followed by the settle delay the firmware needs before the next command.
//! - **MatrixController**: holds the cached [`MatrixState`], turns operations
//!   into protocol commands, and runs a background poll that re-synchronises
//!   the cache from the device's status dump.
//! - **MatrixEvent**: every cache change is broadcast to subscribers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use matrix_control::{ControllerConfig, MatrixController};
//!
//! # async fn run() -> Result<(), matrix_control::ControlError> {
//! let controller = Arc::new(MatrixController::serial(ControllerConfig::default()));
//! let poller = controller.start().await?;
//!
//! controller.set_route(1, 3).await?;
//! println!("{:?}", controller.routes());
//!
//! if let Some(poller) = poller {
//!     poller.stop().await;
//! }
//! controller.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod state;
pub mod transport;

pub use config::ControllerConfig;
pub use controller::{MatrixController, PollerHandle};
pub use error::ControlError;
pub use events::MatrixEvent;
pub use state::{DeviceIdentity, MatrixSnapshot, MatrixState};
pub use transport::{
    Connector, FnConnector, SerialConnector, Transport, DEFAULT_REPLY_LIMIT,
    IDENTITY_REPLY_LIMIT, IO_TIMEOUT, SETTLE_DELAY,
};
