//! Protocol constants for the UV/XY stepper controller link.
//!
//! This module defines the timing model shared with the firmware, the frame
//! layout, the device status vocabulary and the serial port defaults.

/// Reference clock of the step timer, in ticks per second
pub const CLOCK_RATE: u32 = 2_000_000;

/// Full steps (including microstepping) per motor revolution
pub const STEPS_PER_REVOLUTION: u32 = 400;

/// Acceleration used by the ramp formula, in steps/s²
pub const MAX_ACCELERATION: u32 = STEPS_PER_REVOLUTION * STEPS_PER_REVOLUTION;

/// Depth of the device's onboard instruction queue
pub const MAX_IN_FLIGHT: usize = 7;

/// Total length of one frame on the wire, checksum included
pub const FRAME_LENGTH: usize = 36;

/// Length of the checksum trailer
pub const CHECKSUM_LENGTH: usize = 2;

/// Sentinel used to pad frames up to `FRAME_LENGTH - CHECKSUM_LENGTH`
pub const PAD_BYTE: u8 = 123;

/// Frame tag for an acceleration ramp
pub const TAG_RAMP: u8 = b'A';

/// Frame tag for a constant-speed segment
pub const TAG_CONSTANT: u8 = b'C';

/// Frame tag for a homing request
pub const TAG_HOMING: u8 = b'H';

/// Device reset / link ready
pub const STATUS_READY: u8 = b'I';

/// Frame acknowledged
pub const STATUS_ACK: u8 = b'Y';

/// One queued instruction finished executing
pub const STATUS_FINISHED: u8 = b'F';

/// Step scheduler enabled (informational)
pub const STATUS_SCHEDULER: u8 = b'S';

/// Device received a malformed or incomplete frame
pub const STATUS_ERROR: u8 = b'E';

/// Opens a diagnostic comment that runs until `COMMENT_END`
pub const COMMENT_START: u8 = b'|';

/// Closes a diagnostic comment
pub const COMMENT_END: u8 = b'\n';

/// Longest comment held before it is reported in pieces
pub const MAX_COMMENT_LENGTH: usize = 256;

/// Default baud rate of the controller board
pub const BAUD_RATE: u32 = 115_200;

/// Read timeout in milliseconds; the receiver re-checks shutdown on every expiry
pub const TIMEOUT_MS: u64 = 100;

/// Backlog above which axis controllers hold off issuing instructions
pub const BACKLOG_LIMIT: usize = 4;

/// Sleep between backlog polls in axis controllers
pub const POLL_INTERVAL_MS: u64 = 5;
