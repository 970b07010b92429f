//! Jog and Move Example
//!
//! Connects to the controller board, homes it, performs a point-to-point
//! move on both axis pairs and then jogs the XY pair for a few seconds.
//!
//! Usage:
//!   cargo run --example jog                  # Interactive port selection
//!   cargo run --example jog -- /dev/ttyACM0  # Specify port
//!   cargo run --example jog -- link.toml     # Load a config file
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example jog

use inquire::Select;
use log::{info, warn};
use std::time::{Duration, Instant};
use stepper_link::axis::{JogController, Positioner, Throttle};
use stepper_link::{LinkConfig, LinkEventKind, Result, StepperLink};

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = StepperLink::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| std::io::Error::other(format!("Selection cancelled: {}", e)))?;

    Ok(selection
        .split(" - ")
        .next()
        .unwrap_or_default()
        .to_string())
}

fn load_config() -> Result<LinkConfig> {
    match std::env::args().nth(1) {
        Some(arg) if arg.ends_with(".toml") => LinkConfig::from_file(arg),
        Some(port) => Ok(LinkConfig {
            port,
            ..LinkConfig::default()
        }),
        None => Ok(LinkConfig {
            port: select_port()?,
            ..LinkConfig::default()
        }),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    info!("Connecting to controller on {}...", config.port);
    let link = StepperLink::open(&config)?;
    link.subscribe(|event| match &event.kind {
        LinkEventKind::Comment(text) => info!("[{}] device: {}", event.at.format("%H:%M:%S%.3f"), text),
        LinkEventKind::Fatal(cause) => warn!("[{}] link lost: {}", event.at.format("%H:%M:%S%.3f"), cause),
        _ => {}
    });

    info!("=== Homing ===");
    link.send_homing()?;
    link.flush()?;

    let throttle = Throttle::from_config(&config);

    info!("=== Point-to-point move ===");
    let mut positioner = Positioner::new(&link, throttle);
    positioner.move_to(8000, 250)?;
    positioner.move_to(0, 400)?;
    info!("Position: {}", positioner.position());

    info!("=== Jogging XY for 3 seconds ===");
    let mut jog = JogController::new(&link, throttle, 200);
    jog.set_xy(Some((600, true)));
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        jog.tick()?;
    }
    jog.set_xy(None);

    link.flush()?;
    info!("=== Done, {} instructions still executing ===", link.incomplete_count());
    Ok(())
}
