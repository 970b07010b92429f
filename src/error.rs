//! Error types for stepper link operations.

use thiserror::Error;

/// Result type alias for stepper link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Why a session became unusable.
///
/// Recorded once by whichever worker detects it and handed to every later
/// caller, so it has to be cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalCause {
    /// Device answered `E`: it received a malformed or truncated frame
    DeviceReportedError,
    /// Device sent a byte outside the status vocabulary
    UnknownStatus(u8),
    /// The read side of the link reached end of stream
    LinkClosed,
    /// Reading or writing the link failed
    Io(String),
}

impl std::fmt::Display for FatalCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceReportedError => write!(f, "device reported a malformed message"),
            Self::UnknownStatus(b) => write!(f, "unknown status byte {b:#04x}"),
            Self::LinkClosed => write!(f, "link closed"),
            Self::Io(e) => write!(f, "link I/O failed: {e}"),
        }
    }
}

/// Error types for stepper link operations.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration value out of range
    #[error("Invalid config: {0}")]
    Config(String),

    /// Step period must be at least one tick
    #[error("Invalid period: {period}")]
    InvalidPeriod {
        /// Offending period
        period: u32,
    },

    /// A value does not fit the wire field it is destined for
    #[error("Field {field} out of range: {value}")]
    FieldOverflow {
        /// Name of the field
        field: &'static str,
        /// Value that did not fit
        value: i64,
    },

    /// Ramp descriptors must never start at virtual index zero
    #[error("Ramp start index is zero")]
    ZeroStartIndex,

    /// Acceleration fraction or period correction with a non-positive term
    #[error("Invalid fraction {numerator}/{denominator}")]
    InvalidFraction {
        /// Numerator
        numerator: i64,
        /// Denominator
        denominator: i64,
    },

    /// A second-slot payload was still buffered when another second-slot
    /// instruction arrived
    #[error("A second-slot payload is already pending for this frame")]
    PendingSecondSlot,

    /// Both slots of a frame must carry the same instruction kind
    #[error("Cannot pair a {first} instruction with a {second} instruction")]
    MixedInstructionKinds {
        /// Kind in slot 1
        first: &'static str,
        /// Kind in slot 2
        second: &'static str,
    },

    /// Frame checksum validation failed
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame body
        expected: u16,
        /// Checksum carried by the frame
        actual: u16,
    },

    /// Frame is truncated, misaligned or carries an unknown tag
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The session is desynchronized or the link is gone; no further motion is issued
    #[error("Session aborted: {0}")]
    Session(FatalCause),
}
