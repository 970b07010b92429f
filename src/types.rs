use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};

/// Acceleration or deceleration segment in the device's integer ramp model.
///
/// The device starts stepping at `start_period`, treats that step as virtual
/// index `start_index` and applies `next = current - 2*current / (4n + 1)`
/// for `|step_count|` steps. A negative `start_index` walks the index toward
/// zero, which decelerates. The sign of `step_count` is the motion direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampDescriptor {
    pub step_count: i16,
    pub start_period: u16,
    pub start_index: i16,
    pub end_period: u16,
}

impl RampDescriptor {
    pub fn new(step_count: i16, start_period: u16, start_index: i16, end_period: u16) -> Result<Self> {
        let ramp = Self {
            step_count,
            start_period,
            start_index,
            end_period,
        };
        ramp.validate()?;
        Ok(ramp)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_index == 0 {
            return Err(LinkError::ZeroStartIndex);
        }
        check_period(self.start_period)?;
        check_period(self.end_period)
    }

    pub fn is_noop(&self) -> bool {
        self.step_count == 0
    }
}

/// Constant-speed run with a rational period correction.
///
/// Each step lasts `base_period` ticks plus, on average,
/// `period_numerator / period_denominator` of a tick. The device spreads the
/// fractional part with an accumulator so it never drifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantSpeedDescriptor {
    pub step_count: i16,
    pub base_period: u16,
    pub period_numerator: u16,
    pub period_denominator: u16,
}

impl ConstantSpeedDescriptor {
    pub fn new(step_count: i16, base_period: u16) -> Result<Self> {
        let segment = Self {
            step_count,
            base_period,
            period_numerator: 0,
            period_denominator: 1,
        };
        segment.validate()?;
        Ok(segment)
    }

    /// Approximate a fractional period.
    ///
    /// The fraction is expressed over the widest denominator the wire field
    /// allows. Periods that do not fit in 16 bits are rejected.
    pub fn from_period(step_count: i16, period: f64) -> Result<Self> {
        if !period.is_finite() || period < 1.0 {
            return Err(LinkError::InvalidPeriod {
                period: period.max(0.0) as u32,
            });
        }
        let denominator = u16::MAX;
        let mut base = period.floor();
        let mut numerator = ((period - base) * f64::from(denominator)).round();
        if numerator >= f64::from(denominator) {
            base += 1.0;
            numerator = 0.0;
        }
        if base > f64::from(u16::MAX) {
            return Err(LinkError::FieldOverflow {
                field: "base_period",
                value: base as i64,
            });
        }
        let segment = Self {
            step_count,
            base_period: base as u16,
            period_numerator: numerator as u16,
            period_denominator: denominator,
        };
        segment.validate()?;
        Ok(segment)
    }

    pub fn validate(&self) -> Result<()> {
        check_period(self.base_period)?;
        if self.period_denominator == 0 {
            return Err(LinkError::InvalidFraction {
                numerator: self.period_numerator.into(),
                denominator: 0,
            });
        }
        Ok(())
    }

    /// Mean step period in ticks.
    pub fn mean_period(&self) -> f64 {
        f64::from(self.base_period)
            + f64::from(self.period_numerator) / f64::from(self.period_denominator)
    }

    pub fn is_noop(&self) -> bool {
        self.step_count == 0
    }
}

fn check_period(period: u16) -> Result<()> {
    if period == 0 {
        return Err(LinkError::InvalidPeriod { period: 0 });
    }
    Ok(())
}

/// One logical instruction for one axis pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Ramp(RampDescriptor),
    Constant(ConstantSpeedDescriptor),
}

impl Instruction {
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Ramp(_) => "ramp",
            Instruction::Constant(_) => "constant",
        }
    }

    pub fn step_count(&self) -> i16 {
        match self {
            Instruction::Ramp(r) => r.step_count,
            Instruction::Constant(c) => c.step_count,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.step_count() == 0
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Instruction::Ramp(r) => r.validate(),
            Instruction::Constant(c) => c.validate(),
        }
    }
}

impl From<RampDescriptor> for Instruction {
    fn from(ramp: RampDescriptor) -> Self {
        Instruction::Ramp(ramp)
    }
}

impl From<ConstantSpeedDescriptor> for Instruction {
    fn from(segment: ConstantSpeedDescriptor) -> Self {
        Instruction::Constant(segment)
    }
}

/// Which multiplexed channel of a frame an instruction targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisSlot {
    /// UV pair, always present in a frame
    First,
    /// XY pair, duplicated from the first slot when absent
    Second,
}

/// Physical axis as seen by the step scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    U,
    V,
    X,
    Y,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::U, Axis::V, Axis::X, Axis::Y];

    pub fn index(self) -> usize {
        match self {
            Axis::U => 0,
            Axis::V => 1,
            Axis::X => 2,
            Axis::Y => 3,
        }
    }

    pub fn slot(self) -> AxisSlot {
        match self {
            Axis::U | Axis::V => AxisSlot::First,
            Axis::X | Axis::Y => AxisSlot::Second,
        }
    }
}
