//! Matrix Simulation Library
//!
//! This crate provides a simulated Binary B-100/300 HDMI matrix so the
//! controller can be exercised without a serial cable:
//!
//! - **VirtualMatrix**: device model that applies commands and produces replies
//! - **spawn_virtual_matrix**: runs the model behind an in-memory async stream
//!
//! # Example
//!
//! ```rust
//! use matrix_protocol::{MatrixCommand, MatrixSize};
//! use matrix_sim::VirtualMatrix;
//!
//! let mut matrix = VirtualMatrix::new(MatrixSize::FourByFour);
//! matrix.handle(&MatrixCommand::Route { output: 2, input: 4 });
//!
//! let reply = matrix.handle(&MatrixCommand::default_status()).unwrap();
//! assert!(String::from_utf8_lossy(&reply).contains("o02i04"));
//! ```

pub mod device;
pub mod task;

pub use device::{ReceivedFrame, VirtualMatrix, VirtualMatrixConfig};
pub use task::{connect, run_virtual_matrix_task, spawn_virtual_matrix, SharedMatrix};
