//! Merge per-axis pulse trains into one time-ordered sequence.
//!
//! Each axis runs its own clock: a queue of step intervals. The scheduler
//! advances global time to the nearest pending pulse and fires every axis
//! whose pulse falls within `min_activation_delay` of now, the same way the
//! firmware groups pulses it cannot tell apart.

use crate::error::Result;
use crate::types::{Axis, Instruction};
use std::collections::VecDeque;
use std::io::Write;

/// Step intervals for all four axes, executed concurrently
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    intervals: [Vec<u32>; 4],
}

impl Batch {
    pub fn new(intervals: [Vec<u32>; 4]) -> Self {
        Self { intervals }
    }

    /// Expand one instruction per axis; `None` leaves the axis idle.
    pub fn from_instructions(instructions: [Option<&Instruction>; 4]) -> Result<Self> {
        let mut batch = Batch::default();
        for (slot, instruction) in batch.intervals.iter_mut().zip(instructions) {
            if let Some(instruction) = instruction {
                *slot = instruction.expand()?;
            }
        }
        Ok(batch)
    }

    /// What the device executes for one frame: U and V follow the first
    /// slot, X and Y the second (or the first when absent).
    pub fn from_frame(uv: &Instruction, xy: Option<&Instruction>) -> Result<Self> {
        let xy = xy.unwrap_or(uv);
        Self::from_instructions([Some(uv), Some(uv), Some(xy), Some(xy)])
    }

    pub fn steps(&self, axis: Axis) -> usize {
        self.intervals[axis.index()].len()
    }
}

/// One fired pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    /// Global time in ticks
    pub time: u64,
    pub axis: Axis,
    /// Ticks since the previous pulse on the same axis
    pub since_last: u64,
}

/// Summary of one executed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub events: Vec<PulseEvent>,
    /// Pulses fired ahead of their exact time because they fell inside the grouping window
    pub coalesced: usize,
    pub duration: u64,
}

impl BatchReport {
    pub fn steps(&self, axis: Axis) -> usize {
        self.events.iter().filter(|e| e.axis == axis).count()
    }
}

/// Append-only per-axis record sink
pub trait PulseLog {
    fn record(&mut self, axis: Axis, ticks_since_last: u64) -> Result<()>;
}

/// Keeps every record in memory, one vector per axis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLog {
    pub records: [Vec<u64>; 4],
}

impl MemoryLog {
    pub fn axis(&self, axis: Axis) -> &[u64] {
        &self.records[axis.index()]
    }
}

impl PulseLog for MemoryLog {
    fn record(&mut self, axis: Axis, ticks_since_last: u64) -> Result<()> {
        self.records[axis.index()].push(ticks_since_last);
        Ok(())
    }
}

/// Writes one integer per line to a separate stream per axis
pub struct WriterLog<W: Write> {
    writers: [W; 4],
}

impl<W: Write> WriterLog<W> {
    /// Streams in U, V, X, Y order
    pub fn new(writers: [W; 4]) -> Self {
        Self { writers }
    }

    pub fn into_inner(self) -> [W; 4] {
        self.writers
    }
}

impl<W: Write> PulseLog for WriterLog<W> {
    fn record(&mut self, axis: Axis, ticks_since_last: u64) -> Result<()> {
        writeln!(self.writers[axis.index()], "{}", ticks_since_last)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AxisChannel {
    pending: VecDeque<u32>,
    next_activation: u64,
    active: bool,
    since_last: u64,
}

impl AxisChannel {
    fn load(&mut self, intervals: Vec<u32>) {
        self.pending = intervals.into();
        // leftover from a pulse fired early in the previous batch
        let leftover = self.next_activation;
        match self.pending.pop_front() {
            Some(first) => {
                self.next_activation = leftover + u64::from(first);
                self.active = true;
            }
            None => self.active = false,
        }
    }
}

/// Discrete-event merge of the four axis channels
#[derive(Debug, Default)]
pub struct StepScheduler {
    channels: [AxisChannel; 4],
    min_activation_delay: u64,
    time: u64,
}

impl StepScheduler {
    pub fn new(min_activation_delay: u32) -> Self {
        Self {
            min_activation_delay: min_activation_delay.into(),
            ..Self::default()
        }
    }

    /// Global time in ticks since the scheduler was created.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Run `batch` to completion, logging every pulse.
    pub fn run<L: PulseLog>(&mut self, batch: Batch, log: &mut L) -> Result<BatchReport> {
        for (channel, intervals) in self.channels.iter_mut().zip(batch.intervals) {
            channel.load(intervals);
        }

        let start = self.time;
        let mut report = BatchReport::default();
        loop {
            let delta = match self
                .channels
                .iter()
                .filter(|c| c.active)
                .map(|c| c.next_activation)
                .min()
            {
                Some(delta) => delta,
                None => break,
            };
            self.time += delta;

            for (axis, channel) in Axis::ALL.into_iter().zip(self.channels.iter_mut()) {
                if !channel.active {
                    continue;
                }
                channel.next_activation -= delta;
                channel.since_last += delta;
                if channel.next_activation > self.min_activation_delay {
                    continue;
                }

                if channel.next_activation > 0 {
                    report.coalesced += 1;
                }
                match channel.pending.pop_front() {
                    Some(next) => channel.next_activation += u64::from(next),
                    None => channel.active = false,
                }
                log.record(axis, channel.since_last)?;
                report.events.push(PulseEvent {
                    time: self.time,
                    axis,
                    since_last: channel.since_last,
                });
                channel.since_last = 0;
            }
        }
        report.duration = self.time - start;
        Ok(report)
    }
}

/// Step counts of a two-axis preview after each merged event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewStep {
    pub time: u64,
    pub a_steps: usize,
    pub b_steps: usize,
}

/// Merge two interval lists for a 2-D trajectory preview.
///
/// Pulses due at the same cumulative time advance both counters; otherwise
/// only the earlier one moves.
pub fn merge_preview(a: &[u32], b: &[u32]) -> Vec<PreviewStep> {
    let cumulative = |intervals: &[u32]| -> Vec<u64> {
        intervals
            .iter()
            .scan(0u64, |t, &dt| {
                *t += u64::from(dt);
                Some(*t)
            })
            .collect()
    };
    let (ta, tb) = (cumulative(a), cumulative(b));
    let (mut i, mut j) = (0, 0);
    let mut steps = Vec::with_capacity(ta.len() + tb.len());
    while i < ta.len() || j < tb.len() {
        let time = match (ta.get(i), tb.get(j)) {
            (Some(&x), Some(&y)) if x == y => {
                i += 1;
                j += 1;
                x
            }
            (Some(&x), Some(&y)) if x < y => {
                i += 1;
                x
            }
            (Some(&x), None) => {
                i += 1;
                x
            }
            (_, Some(&y)) => {
                j += 1;
                y
            }
            (None, None) => break,
        };
        steps.push(PreviewStep {
            time,
            a_steps: i,
            b_steps: j,
        });
    }
    steps
}
