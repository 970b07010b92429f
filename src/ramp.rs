//! Integer acceleration ramps.
//!
//! The firmware accelerates with the classic integer recurrence
//! `next = current - 2*current / (4n + 1)` where `n` is a virtual step index
//! tied to the period by `period(n) = CLOCK_RATE / sqrt(2 * n * MAX_ACCELERATION)`.
//! The host only precomputes where a ramp starts and ends so that everything
//! fits the frame's 16-bit fields. For simulation, descriptors are expanded
//! with the closed form of that relation instead of the recurrence, which
//! drifts once `2*current < 4n + 1`.

use crate::constants::{CLOCK_RATE, MAX_ACCELERATION};
use crate::error::{LinkError, Result};
use crate::types::{ConstantSpeedDescriptor, Instruction, RampDescriptor};

/// Virtual ramp index at which the kinematic relation yields `period`.
///
/// `numerator / denominator` scales the acceleration. The result is truncated
/// and never below one.
pub fn step_index(period: u16, numerator: i32, denominator: i32) -> Result<i16> {
    if period == 0 {
        return Err(LinkError::InvalidPeriod { period: 0 });
    }
    if numerator <= 0 || denominator <= 0 {
        return Err(LinkError::InvalidFraction {
            numerator: numerator.into(),
            denominator: denominator.into(),
        });
    }
    let clock = u128::from(CLOCK_RATE);
    let p = u128::from(period);
    let index = clock * clock * numerator as u128
        / (2 * p * p * u128::from(MAX_ACCELERATION) * denominator as u128);
    let index = index.max(1);
    i16::try_from(index).map_err(|_| LinkError::FieldOverflow {
        field: "step_index",
        value: i64::try_from(index).unwrap_or(i64::MAX),
    })
}

/// Step period at virtual index `n`; the sign of `n` is ignored.
pub fn period_at(n: i32) -> Result<u16> {
    if n == 0 {
        return Err(LinkError::ZeroStartIndex);
    }
    let denom = (2.0 * f64::from(n.unsigned_abs()) * f64::from(MAX_ACCELERATION)).sqrt();
    let period = (f64::from(CLOCK_RATE) / denom).round();
    if !(1.0..=f64::from(u16::MAX)).contains(&period) {
        return Err(LinkError::FieldOverflow {
            field: "period",
            value: period as i64,
        });
    }
    Ok(period as u16)
}

/// Ramp from `start_period` toward `end_period`, covering at most
/// `|distance_limit|` steps in the direction of its sign.
///
/// ```
/// use stepper_link::ramp::bound_ramp;
///
/// let ramp = bound_ramp(2000, 200, 30000).unwrap();
/// assert_eq!((ramp.step_count, ramp.start_period, ramp.start_index, ramp.end_period), (309, 2000, 3, 200));
/// ```
pub fn bound_ramp(start_period: u16, end_period: u16, distance_limit: i16) -> Result<RampDescriptor> {
    bound_ramp_scaled(start_period, end_period, distance_limit, 1, 1)
}

/// [`bound_ramp`] with the acceleration scaled by `numerator / denominator`.
///
/// The scale only moves the virtual indices; the reported end period is
/// always taken from the unscaled relation, matching the firmware.
pub fn bound_ramp_scaled(
    start_period: u16,
    end_period: u16,
    distance_limit: i16,
    numerator: i32,
    denominator: i32,
) -> Result<RampDescriptor> {
    let sign: i32 = if distance_limit >= 0 { 1 } else { -1 };
    let limit = i32::from(distance_limit).abs();

    let start_index = i32::from(step_index(start_period, numerator, denominator)?);
    let end_index = i32::from(step_index(end_period, numerator, denominator)?);

    let (step_count, signed_start, reached) = if start_index < end_index {
        let steps = (end_index - start_index).min(limit);
        (steps, start_index, start_index + steps)
    } else {
        let steps = (start_index - end_index).min(limit);
        (steps, -start_index, start_index - steps)
    };

    RampDescriptor::new(
        narrow("step_count", step_count * sign)?,
        start_period,
        narrow("start_index", signed_start)?,
        period_at(reached)?,
    )
}

impl RampDescriptor {
    /// Mirror ramp that returns to this ramp's start period after the same
    /// number of steps in the same direction.
    pub fn invert(&self) -> Result<RampDescriptor> {
        let index = -i32::from(self.start_index) - i32::from(self.step_count).abs();
        RampDescriptor::new(
            self.step_count,
            self.end_period,
            narrow("start_index", index)?,
            self.start_period,
        )
    }

    /// Per-step periods of this ramp, one per step.
    ///
    /// Interval `k` is the period at virtual index `start_index + k` (moving
    /// toward zero for a negative origin), taken from the closed form the
    /// firmware recurrence approximates and kept between the two descriptor
    /// periods. The final step lands on `end_period`, so a ramp followed by
    /// its inversion ends where it started.
    pub fn expand(&self) -> Result<Vec<u32>> {
        self.validate()?;
        let steps = i32::from(self.step_count.unsigned_abs());
        let origin = i32::from(self.start_index);
        if origin < 0 && -origin < steps {
            return Err(LinkError::ZeroStartIndex);
        }
        let lo = self.start_period.min(self.end_period);
        let hi = self.start_period.max(self.end_period);

        let mut intervals = Vec::with_capacity(steps as usize);
        for k in 1..steps {
            let index = if origin > 0 { origin + k } else { -origin - k };
            intervals.push(u32::from(period_at(index)?.clamp(lo, hi)));
        }
        if steps > 0 {
            intervals.push(u32::from(self.end_period));
        }
        Ok(intervals)
    }
}

impl ConstantSpeedDescriptor {
    /// Per-step periods with the fractional correction spread by an accumulator.
    pub fn expand(&self) -> Result<Vec<u32>> {
        self.validate()?;
        let steps = usize::from(self.step_count.unsigned_abs());
        let base = u32::from(self.base_period);
        let numerator = u32::from(self.period_numerator);
        let denominator = u32::from(self.period_denominator);
        let mut acc = 0u32;
        let mut intervals = Vec::with_capacity(steps);
        for _ in 0..steps {
            acc += numerator;
            let extra = acc / denominator;
            acc %= denominator;
            intervals.push(base + extra);
        }
        Ok(intervals)
    }
}

impl Instruction {
    pub fn expand(&self) -> Result<Vec<u32>> {
        match self {
            Instruction::Ramp(r) => r.expand(),
            Instruction::Constant(c) => c.expand(),
        }
    }
}

fn narrow(field: &'static str, value: i32) -> Result<i16> {
    i16::try_from(value).map_err(|_| LinkError::FieldOverflow {
        field,
        value: value.into(),
    })
}
