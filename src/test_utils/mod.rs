//! Test utilities for the camera driver
//!
//! Provides a simulated camera and a scripted byte stream so the protocol can
//! be exercised without a serial port.

pub mod device_simulator;
pub mod scripted;

pub use device_simulator::*;
pub use scripted::*;
