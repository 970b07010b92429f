//! # Stepper Link
//!
//! Host-side driver for a four-axis (UV + XY) stepper controller attached over
//! a serial link. The microcontroller generates the step pulses; this library
//! decides what it is told to do and keeps its small instruction queue fed.
//!
//! ## Features
//!
//! - Integer acceleration ramps that fit the firmware's 16-bit fields
//! - 36-byte frame codec with dual-axis multiplexing and additive checksum
//! - Flow-controlled sender/receiver pair bounded by the device queue depth
//! - Four-axis pulse scheduler to check what the device will execute
//! - Velocity, point-to-point and jog controllers
//!
//! ## Example
//!
//! ```no_run
//! use stepper_link::{bound_ramp, LinkConfig, StepperLink};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LinkConfig {
//!         port: "/dev/ttyACM0".to_string(),
//!         ..LinkConfig::default()
//!     };
//!     let link = StepperLink::open(&config)?;
//!     let accel = bound_ramp(2000, 200, 5000)?;
//!     link.send_ramp(&accel, None)?;
//!     link.send_ramp(&accel.invert()?, None)?;
//!     link.flush()?;
//!     Ok(())
//! }
//! ```

pub mod axis;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod ramp;
pub mod scheduler;
pub mod types;

pub use codec::{DecodedFrame, Frame};
pub use config::LinkConfig;
pub use error::{FatalCause, LinkError, Result};
pub use protocol::{LinkEvent, LinkEventKind, StepperLink};
pub use ramp::{bound_ramp, bound_ramp_scaled};
pub use scheduler::{Batch, StepScheduler};
pub use types::*;
