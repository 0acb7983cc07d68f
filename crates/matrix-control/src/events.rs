//! Events published by the controller
//!
//! Every change to the cache goes out on a broadcast channel. Subscribers
//! that fall behind lose old events rather than slowing the controller down.

use serde::Serialize;

use crate::state::MatrixSnapshot;

/// Something observers may want to know about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MatrixEvent {
    /// The cached routing or power state was written
    StateUpdated(MatrixSnapshot),

    /// Firmware and IP queries finished
    InfoUpdated {
        /// Firmware banner, if known
        firmware: Option<String>,
        /// Device IP address, if known
        ip_address: Option<String>,
    },

    /// A background poll failed; the loop keeps going
    PollFailed {
        /// Error text
        message: String,
    },
}
