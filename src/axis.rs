//! Axis controllers built on the link's instruction API.
//!
//! Controllers poll the backlog before issuing more work and sleep while the
//! device is busy. That is only throttling; the link's in-flight window is
//! what keeps the device queue from overflowing.

use crate::error::Result;
use crate::protocol::StepperLink;
use crate::ramp::{bound_ramp, period_at, step_index};
use crate::types::{ConstantSpeedDescriptor, Instruction};
use log::debug;
use std::thread;
use std::time::Duration;

/// Where controllers send their instructions
pub trait MotionSink {
    /// Queue one frame: `uv` for the first pair, `xy` (or `uv` again) for the second.
    fn send_pair(&self, uv: &Instruction, xy: Option<&Instruction>) -> Result<()>;

    fn incomplete_count(&self) -> usize;

    /// Fails once the sink can no longer accept motion.
    fn health(&self) -> Result<()> {
        Ok(())
    }
}

impl MotionSink for StepperLink {
    fn send_pair(&self, uv: &Instruction, xy: Option<&Instruction>) -> Result<()> {
        self.send_instructions(uv, xy)
    }

    fn incomplete_count(&self) -> usize {
        StepperLink::incomplete_count(self)
    }

    fn health(&self) -> Result<()> {
        self.check()
    }
}

/// Backlog polling settings shared by the controllers
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub backlog_limit: usize,
    pub poll_interval: Duration,
}

impl Throttle {
    pub fn from_config(config: &crate::LinkConfig) -> Self {
        Self {
            backlog_limit: config.backlog_limit,
            poll_interval: config.poll_interval(),
        }
    }

    fn wait_for_room<S: MotionSink + ?Sized>(&self, sink: &S) -> Result<()> {
        loop {
            sink.health()?;
            if sink.incomplete_count() < self.backlog_limit {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Slowest period the ramp model represents; motion starts and ends here.
pub fn rest_period() -> Result<u16> {
    period_at(1)
}

/// Ramp up to `cruise_period`, cruise, and ramp back down over exactly
/// `distance` steps. Cruising is split into segments that fit a frame.
pub fn plan_move(distance: i32, cruise_period: u16) -> Result<Vec<Instruction>> {
    let sign: i32 = if distance >= 0 { 1 } else { -1 };
    let total = distance.unsigned_abs();
    let rest = rest_period()?;
    let mut plan: Vec<Instruction> = Vec::new();

    let half = (total / 2).min(i16::MAX as u32) as i32;
    let accel = bound_ramp(rest, cruise_period, (half * sign) as i16)?;
    let ramp_steps = u32::from(accel.step_count.unsigned_abs());
    let mut cruise = total - 2 * ramp_steps;
    // without a ramp, never start faster than rest
    let cruise_at = if ramp_steps == 0 {
        cruise_period.max(rest)
    } else {
        accel.end_period
    };

    if ramp_steps > 0 {
        plan.push(Instruction::Ramp(accel));
    }
    while cruise > 0 {
        let chunk = cruise.min(i16::MAX as u32);
        let steps = (chunk as i32 * sign) as i16;
        plan.push(ConstantSpeedDescriptor::new(steps, cruise_at)?.into());
        cruise -= chunk;
    }
    if ramp_steps > 0 {
        plan.push(Instruction::Ramp(accel.invert()?));
    }
    Ok(plan)
}

/// Point-to-point moves of both axis pairs together
pub struct Positioner<'a, S: MotionSink + ?Sized> {
    sink: &'a S,
    throttle: Throttle,
    position: i64,
}

impl<'a, S: MotionSink + ?Sized> Positioner<'a, S> {
    pub fn new(sink: &'a S, throttle: Throttle) -> Self {
        Self {
            sink,
            throttle,
            position: 0,
        }
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn move_to(&mut self, target: i64, cruise_period: u16) -> Result<()> {
        let mut remaining = target - self.position;
        while remaining != 0 {
            let leg = remaining.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
            self.move_by(leg, cruise_period)?;
            remaining -= i64::from(leg);
        }
        Ok(())
    }

    pub fn move_by(&mut self, distance: i32, cruise_period: u16) -> Result<()> {
        let plan = plan_move(distance, cruise_period)?;
        debug!("Moving {} steps in {} instructions", distance, plan.len());
        for instruction in &plan {
            self.throttle.wait_for_room(self.sink)?;
            self.sink.send_pair(instruction, None)?;
            self.position += i64::from(instruction.step_count());
        }
        Ok(())
    }
}

/// Drives both axis pairs toward a target speed in bounded chunks
pub struct VelocityServo<'a, S: MotionSink + ?Sized> {
    sink: &'a S,
    throttle: Throttle,
    chunk_steps: i16,
    current: Option<u16>,
    target: Option<u16>,
    direction: i16,
}

impl<'a, S: MotionSink + ?Sized> VelocityServo<'a, S> {
    pub fn new(sink: &'a S, throttle: Throttle, chunk_steps: i16) -> Self {
        Self {
            sink,
            throttle,
            chunk_steps: chunk_steps.max(1),
            current: None,
            target: None,
            direction: 1,
        }
    }

    /// Request a speed as a step period.
    ///
    /// A request against the current direction of travel only brings the axes
    /// to rest; repeat it once [`current_period`](Self::current_period) is `None`.
    pub fn set_target(&mut self, period: u16, forward: bool) {
        let direction = if forward { 1 } else { -1 };
        if direction != self.direction && self.current.is_some() {
            // finish decelerating before turning around
            self.target = None;
            return;
        }
        self.direction = direction;
        self.target = Some(period);
    }

    pub fn stop(&mut self) {
        self.target = None;
    }

    pub fn current_period(&self) -> Option<u16> {
        self.current
    }

    /// Issue the next chunk. Returns `None` once stopped at rest.
    pub fn tick(&mut self) -> Result<Option<Instruction>> {
        let rest = rest_period()?;
        let from = self.current.unwrap_or(rest);
        let to = match (self.current, self.target) {
            (None, None) => return Ok(None),
            (_, Some(target)) => target,
            (Some(_), None) => rest,
        };

        let steps = self.chunk_steps * self.direction;
        let instruction: Instruction = if step_index(from, 1, 1)? == step_index(to, 1, 1)? {
            if self.target.is_none() {
                self.current = None;
                return Ok(None);
            }
            ConstantSpeedDescriptor::new(steps, to)?.into()
        } else {
            let ramp = bound_ramp(from, to, steps)?;
            Instruction::Ramp(ramp)
        };

        self.throttle.wait_for_room(self.sink)?;
        self.sink.send_pair(&instruction, None)?;
        self.current = match instruction {
            Instruction::Ramp(ramp) => Some(ramp.end_period),
            Instruction::Constant(segment) => Some(segment.base_period),
        };
        Ok(Some(instruction))
    }
}

/// Independent constant-speed jogging of the UV and XY pairs
pub struct JogController<'a, S: MotionSink + ?Sized> {
    sink: &'a S,
    throttle: Throttle,
    chunk_steps: i16,
    uv: Option<(u16, bool)>,
    xy: Option<(u16, bool)>,
}

impl<'a, S: MotionSink + ?Sized> JogController<'a, S> {
    pub fn new(sink: &'a S, throttle: Throttle, chunk_steps: i16) -> Self {
        Self {
            sink,
            throttle,
            chunk_steps: chunk_steps.max(1),
            uv: None,
            xy: None,
        }
    }

    /// Jog the UV pair at `period`, or hold it with `None`.
    pub fn set_uv(&mut self, jog: Option<(u16, bool)>) {
        self.uv = jog;
    }

    pub fn set_xy(&mut self, jog: Option<(u16, bool)>) {
        self.xy = jog;
    }

    fn segment(&self, jog: Option<(u16, bool)>, rest: u16) -> Result<Instruction> {
        Ok(match jog {
            Some((period, forward)) => {
                let steps = if forward { self.chunk_steps } else { -self.chunk_steps };
                ConstantSpeedDescriptor::new(steps, period)?.into()
            }
            None => ConstantSpeedDescriptor::new(0, rest)?.into(),
        })
    }

    /// Send one chunk for both pairs. Returns false while both are held.
    pub fn tick(&mut self) -> Result<bool> {
        if self.uv.is_none() && self.xy.is_none() {
            return Ok(false);
        }
        let rest = rest_period()?;
        let uv = self.segment(self.uv, rest)?;
        let xy = self.segment(self.xy, rest)?;
        self.throttle.wait_for_room(self.sink)?;
        self.sink.send_pair(&uv, Some(&xy))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FatalCause, LinkError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Instruction, Option<Instruction>)>>,
        backlog: AtomicUsize,
        dead: bool,
    }

    impl MotionSink for Recorder {
        fn send_pair(&self, uv: &Instruction, xy: Option<&Instruction>) -> Result<()> {
            self.sent.lock().push((*uv, xy.copied()));
            Ok(())
        }

        fn incomplete_count(&self) -> usize {
            self.backlog.load(Ordering::SeqCst)
        }

        fn health(&self) -> Result<()> {
            if self.dead {
                return Err(LinkError::Session(FatalCause::LinkClosed));
            }
            Ok(())
        }
    }

    fn throttle() -> Throttle {
        Throttle {
            backlog_limit: 4,
            poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn planned_move_covers_exact_distance() {
        for (distance, cruise) in [0, 1, 2, 7, 600, -600, 100_000, -70_001]
            .into_iter()
            .flat_map(|d| [(d, 200), (d, 60_000)])
        {
            let plan = plan_move(distance, cruise).unwrap();
            let total: i32 = plan.iter().map(|i| i32::from(i.step_count())).sum();
            assert_eq!(total, distance, "distance {distance} at {cruise}");
        }
    }

    #[test]
    fn planned_move_is_symmetric() {
        let plan = plan_move(10_000, 200).unwrap();
        let (first, last) = match (plan.first(), plan.last()) {
            (Some(Instruction::Ramp(a)), Some(Instruction::Ramp(b))) => (*a, *b),
            other => panic!("expected ramps at both ends, got {other:?}"),
        };
        assert_eq!(last, first.invert().unwrap());
        assert_eq!(last.end_period, rest_period().unwrap());
        assert_eq!(first.end_period, 200);
    }

    #[test]
    fn slow_cruise_keeps_requested_period() {
        let plan = plan_move(1000, 60_000).unwrap();
        let total: i32 = plan.iter().map(|i| i32::from(i.step_count())).sum();
        assert_eq!(total, 1000);
        for instruction in &plan {
            match instruction {
                Instruction::Constant(segment) => assert_eq!(segment.base_period, 60_000),
                other => panic!("no ramp expected, got {other:?}"),
            }
        }

        // too short to ramp: moves at rest, not at the faster cruise
        match plan_move(1, 200).unwrap().as_slice() {
            [Instruction::Constant(segment)] => {
                assert_eq!(segment.base_period, rest_period().unwrap())
            }
            other => panic!("expected one constant segment, got {other:?}"),
        }
    }

    #[test]
    fn positioner_tracks_position() {
        let sink = Recorder::default();
        let mut positioner = Positioner::new(&sink, throttle());
        positioner.move_to(1500, 300).unwrap();
        positioner.move_to(-200, 300).unwrap();
        assert_eq!(positioner.position(), -200);
        assert!(sink.sent.lock().iter().all(|(_, xy)| xy.is_none()));
    }

    #[test]
    fn servo_ramps_then_cruises_then_stops() {
        let sink = Recorder::default();
        let mut servo = VelocityServo::new(&sink, throttle(), 100);
        servo.set_target(200, true);

        let mut kinds = Vec::new();
        for _ in 0..5 {
            kinds.push(servo.tick().unwrap().unwrap().kind());
        }
        assert_eq!(kinds, vec!["ramp", "ramp", "ramp", "ramp", "constant"]);
        assert_eq!(servo.current_period(), Some(200));

        servo.stop();
        let mut ticks = 0;
        while servo.tick().unwrap().is_some() {
            ticks += 1;
            assert!(ticks < 100);
        }
        assert_eq!(servo.current_period(), None);
    }

    #[test]
    fn jog_holds_idle_pair_with_noop() {
        let sink = Recorder::default();
        let mut jog = JogController::new(&sink, throttle(), 50);
        assert!(!jog.tick().unwrap());
        jog.set_xy(Some((400, false)));
        assert!(jog.tick().unwrap());
        let (uv, xy) = sink.sent.lock()[0];
        assert!(uv.is_noop());
        assert_eq!(xy.map(|i| i.step_count()), Some(-50));
    }

    #[test]
    fn controllers_stop_on_dead_sink() {
        let sink = Recorder {
            dead: true,
            ..Recorder::default()
        };
        let mut jog = JogController::new(&sink, throttle(), 50);
        jog.set_uv(Some((400, true)));
        assert!(matches!(jog.tick(), Err(LinkError::Session(_))));
        assert!(sink.sent.lock().is_empty());
    }
}
