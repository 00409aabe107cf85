//! Hardware access layer.
//!
//! The only seam between the protocol logic and physical devices is the
//! [`MotionLink`] trait: a byte transport with per-read timeouts. Production
//! code uses [`SerialLink`] over an RS-232/USB serial port; tests use
//! [`mock::MockLink`] with scripted responses.

pub mod link;
pub mod mock;

pub use link::{MotionLink, SerialLink};
