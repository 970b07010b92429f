//! Fixed-length binary frames.
//!
//! Layout on the wire:
//!
//! ```text
//! [tag][slot 1 payload: 8][slot 2 payload: 8][PAD_BYTE ...][checksum: 2]
//! ```
//!
//! Every numeric field is big-endian 16-bit. A frame always carries both
//! axis pairs; when only the first slot is given, its payload is repeated for
//! the second.

use crate::constants::*;
use crate::error::{LinkError, Result};
use crate::types::{AxisSlot, ConstantSpeedDescriptor, Instruction, RampDescriptor};

/// Encoded size of one instruction without its tag
pub const PAYLOAD_LENGTH: usize = 8;

const BODY_LENGTH: usize = FRAME_LENGTH - CHECKSUM_LENGTH;
const PAYLOAD_END: usize = 1 + 2 * PAYLOAD_LENGTH;

/// Tagless encoding of one instruction, waiting to be placed in a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    tag: u8,
    step_count: i16,
    bytes: [u8; PAYLOAD_LENGTH],
}

impl Payload {
    pub fn encode(instruction: &Instruction) -> Result<Self> {
        instruction.validate()?;
        let (tag, words) = match instruction {
            Instruction::Ramp(r) => (
                TAG_RAMP,
                [r.step_count as u16, r.start_period, r.start_index as u16, r.end_period],
            ),
            Instruction::Constant(c) => (
                TAG_CONSTANT,
                [c.step_count as u16, c.base_period, c.period_numerator, c.period_denominator],
            ),
        };
        let mut bytes = [0u8; PAYLOAD_LENGTH];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        Ok(Self {
            tag,
            step_count: instruction.step_count(),
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8; PAYLOAD_LENGTH] {
        &self.bytes
    }

    fn kind(&self) -> &'static str {
        if self.tag == TAG_RAMP {
            "ramp"
        } else {
            "constant"
        }
    }
}

/// Outcome of feeding one instruction to [`encode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Second-slot payload; pass it back as `pending` with the first-slot instruction
    Buffered(Payload),
    /// Complete frame ready for the link
    Ready(Frame),
    /// Every instruction in the frame moves zero steps; nothing to send
    Empty,
}

/// Encode `instruction` for `slot`.
///
/// The caller owns the multiplexing state: a second-slot instruction comes
/// back as [`Encoded::Buffered`] and must be handed in as `pending` together
/// with the first-slot instruction that completes the frame. Handing a
/// pending payload to another second-slot call is an error rather than a
/// silent overwrite.
pub fn encode(instruction: &Instruction, slot: AxisSlot, pending: Option<Payload>) -> Result<Encoded> {
    let payload = Payload::encode(instruction)?;
    match slot {
        AxisSlot::Second if pending.is_some() => Err(LinkError::PendingSecondSlot),
        AxisSlot::Second => Ok(Encoded::Buffered(payload)),
        AxisSlot::First => {
            let second = pending.unwrap_or(payload);
            if second.tag != payload.tag {
                return Err(LinkError::MixedInstructionKinds {
                    first: payload.kind(),
                    second: second.kind(),
                });
            }
            if payload.step_count == 0 && second.step_count == 0 {
                return Ok(Encoded::Empty);
            }
            Ok(Encoded::Ready(Frame::assemble(payload.tag, &[&payload.bytes, &second.bytes])))
        }
    }
}

/// Encode a pair of instructions into one frame.
pub fn encode_pair(first: &Instruction, second: Option<&Instruction>) -> Result<Option<Frame>> {
    let pending = match second {
        Some(instruction) => match encode(instruction, AxisSlot::Second, None)? {
            Encoded::Buffered(payload) => Some(payload),
            _ => None,
        },
        None => None,
    };
    match encode(first, AxisSlot::First, pending)? {
        Encoded::Ready(frame) => Ok(Some(frame)),
        _ => Ok(None),
    }
}

/// Additive 16-bit checksum with wraparound.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0i16, |sum, &b| sum.wrapping_add(i16::from(b))) as u16
}

/// One 36-byte frame, checksum included
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LENGTH]);

impl Frame {
    fn assemble(tag: u8, payloads: &[&[u8; PAYLOAD_LENGTH]]) -> Self {
        let mut bytes = [PAD_BYTE; FRAME_LENGTH];
        bytes[0] = tag;
        let mut at = 1;
        for payload in payloads {
            bytes[at..at + PAYLOAD_LENGTH].copy_from_slice(*payload);
            at += PAYLOAD_LENGTH;
        }
        let sum = checksum(&bytes[..BODY_LENGTH]);
        bytes[BODY_LENGTH..].copy_from_slice(&sum.to_be_bytes());
        Frame(bytes)
    }

    /// Homing request: tag only, padded and checksummed.
    pub fn homing() -> Self {
        Self::assemble(TAG_HOMING, &[])
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LENGTH] {
        &self.0
    }

    pub fn tag(&self) -> u8 {
        self.0[0]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.0[BODY_LENGTH], self.0[BODY_LENGTH + 1]])
    }

    /// Payload bytes of one slot, `None` for homing frames.
    pub fn slot_payload(&self, slot: AxisSlot) -> Option<&[u8]> {
        if self.tag() == TAG_HOMING {
            return None;
        }
        let start = match slot {
            AxisSlot::First => 1,
            AxisSlot::Second => 1 + PAYLOAD_LENGTH,
        };
        Some(&self.0[start..start + PAYLOAD_LENGTH])
    }

    /// Verify and parse a frame received or captured from the wire.
    pub fn decode(bytes: &[u8]) -> Result<DecodedFrame> {
        let raw: [u8; FRAME_LENGTH] = bytes.try_into().map_err(|_| {
            LinkError::InvalidFrame(format!("expected {FRAME_LENGTH} bytes, got {}", bytes.len()))
        })?;
        let frame = Frame(raw);
        let expected = checksum(&raw[..BODY_LENGTH]);
        if expected != frame.checksum() {
            return Err(LinkError::ChecksumMismatch {
                expected,
                actual: frame.checksum(),
            });
        }

        let padding_start = match frame.tag() {
            TAG_HOMING => 1,
            TAG_RAMP | TAG_CONSTANT => PAYLOAD_END,
            other => return Err(LinkError::InvalidFrame(format!("unknown tag {other:#04x}"))),
        };
        if raw[padding_start..BODY_LENGTH].iter().any(|&b| b != PAD_BYTE) {
            return Err(LinkError::InvalidFrame("padding corrupted".to_string()));
        }

        let words = |slot| {
            let payload = &raw[slot..slot + PAYLOAD_LENGTH];
            let word = |i: usize| u16::from_be_bytes([payload[2 * i], payload[2 * i + 1]]);
            [word(0), word(1), word(2), word(3)]
        };
        let (first, second) = (words(1), words(1 + PAYLOAD_LENGTH));
        match frame.tag() {
            TAG_RAMP => Ok(DecodedFrame::Ramp(ramp_from(first)?, ramp_from(second)?)),
            TAG_CONSTANT => Ok(DecodedFrame::Constant(constant_from(first)?, constant_from(second)?)),
            _ => Ok(DecodedFrame::Homing),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({})", hex(&self.0))
    }
}

/// Contents of a verified frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    Ramp(RampDescriptor, RampDescriptor),
    Constant(ConstantSpeedDescriptor, ConstantSpeedDescriptor),
    Homing,
}

fn ramp_from(w: [u16; 4]) -> Result<RampDescriptor> {
    RampDescriptor::new(w[0] as i16, w[1], w[2] as i16, w[3])
}

fn constant_from(w: [u16; 4]) -> Result<ConstantSpeedDescriptor> {
    let segment = ConstantSpeedDescriptor {
        step_count: w[0] as i16,
        base_period: w[1],
        period_numerator: w[2],
        period_denominator: w[3],
    };
    segment.validate()?;
    Ok(segment)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
