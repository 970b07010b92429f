//! Offline Pulse Simulation
//!
//! Plans a move, encodes it exactly as it would go on the wire, and replays
//! the decoded frames through the four-axis step scheduler. Per-axis pulse
//! logs are written to `pulses_<axis>.log` and a JSON summary is printed.
//!
//! Usage:
//!   cargo run --example simulate -- 12000 250

use log::info;
use std::fs::File;
use std::io::BufWriter;
use stepper_link::axis::plan_move;
use stepper_link::codec::encode_pair;
use stepper_link::scheduler::WriterLog;
use stepper_link::{Batch, DecodedFrame, Frame, Instruction, Result, StepScheduler};

fn arg<T: std::str::FromStr>(n: usize, default: T) -> T {
    std::env::args()
        .nth(n)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let distance: i32 = arg(1, 12_000);
    let cruise_period: u16 = arg(2, 250);
    let plan = plan_move(distance, cruise_period)?;
    info!("Planned {} steps as {} instructions", distance, plan.len());

    let mut scheduler = StepScheduler::new(4);
    let mut log = WriterLog::new([
        BufWriter::new(File::create("pulses_u.log")?),
        BufWriter::new(File::create("pulses_v.log")?),
        BufWriter::new(File::create("pulses_x.log")?),
        BufWriter::new(File::create("pulses_y.log")?),
    ]);

    let mut summary = Vec::new();
    for instruction in &plan {
        let Some(frame) = encode_pair(instruction, None)? else {
            continue;
        };
        let (uv, xy): (Instruction, Instruction) = match Frame::decode(frame.as_bytes())? {
            DecodedFrame::Ramp(a, b) => (a.into(), b.into()),
            DecodedFrame::Constant(a, b) => (a.into(), b.into()),
            DecodedFrame::Homing => continue,
        };
        let report = scheduler.run(Batch::from_frame(&uv, Some(&xy))?, &mut log)?;
        summary.push(serde_json::json!({
            "instruction": uv,
            "checksum": frame.checksum(),
            "ticks": report.duration,
            "coalesced": report.coalesced,
        }));
    }

    for mut writer in log.into_inner() {
        std::io::Write::flush(&mut writer)?;
    }

    let seconds = scheduler.time() as f64 / f64::from(stepper_link::constants::CLOCK_RATE);
    info!("Move takes {:.3} s of machine time", seconds);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(std::io::Error::other)?
    );
    Ok(())
}
