//! Simulated controller board for driving `StepperLink` without hardware.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stepper_link::constants::{FRAME_LENGTH, MAX_IN_FLIGHT};
use stepper_link::{LinkConfig, StepperLink};

#[derive(Default)]
struct DeviceState {
    frames: Vec<Vec<u8>>,
    queued: usize,
    max_queued: usize,
    overflowed: bool,
}

/// Test-side handle to the simulated device
#[derive(Clone)]
pub struct Device {
    state: Arc<Mutex<DeviceState>>,
    to_host: Sender<u8>,
    hung_up: Arc<AtomicBool>,
}

impl Device {
    pub fn send(&self, bytes: &[u8]) {
        for &b in bytes {
            let _ = self.to_host.send(b);
        }
    }

    /// Report `n` instructions as executed.
    pub fn complete(&self, n: usize) {
        for _ in 0..n {
            {
                let mut state = self.state.lock();
                assert!(state.queued > 0, "completion without a queued instruction");
                state.queued -= 1;
            }
            self.send(b"F");
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queued
    }

    pub fn max_queued(&self) -> usize {
        self.state.lock().max_queued
    }

    pub fn overflowed(&self) -> bool {
        self.state.lock().overflowed
    }

    /// Simulate a power cycle: the board forgets its queue and says hello.
    pub fn reset(&self) {
        self.state.lock().queued = 0;
        self.send(b"I");
    }

    pub fn hang_up(&self) {
        self.hung_up.store(true, Ordering::SeqCst);
    }
}

/// Host end of the device-to-host byte stream
pub struct HostReader {
    rx: Receiver<u8>,
    hung_up: Arc<AtomicBool>,
}

impl Read for HostReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.hung_up.load(Ordering::SeqCst) || buf.is_empty() {
            return Ok(0);
        }
        match self.rx.recv_timeout(Duration::from_millis(5)) {
            Ok(b) => {
                buf[0] = b;
                let mut n = 1;
                while n < buf.len() {
                    match self.rx.try_recv() {
                        Ok(b) => {
                            buf[n] = b;
                            n += 1;
                        }
                        Err(_) => break,
                    }
                }
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Err(io::ErrorKind::TimedOut.into()),
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

/// Host end of the host-to-device stream; acknowledges every complete frame
pub struct HostWriter {
    pending: Vec<u8>,
    state: Arc<Mutex<DeviceState>>,
    to_host: Sender<u8>,
}

impl Write for HostWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while self.pending.len() >= FRAME_LENGTH {
            let frame: Vec<u8> = self.pending.drain(..FRAME_LENGTH).collect();
            {
                let mut state = self.state.lock();
                state.frames.push(frame);
                state.queued += 1;
                state.max_queued = state.max_queued.max(state.queued);
                if state.queued > MAX_IN_FLIGHT {
                    state.overflowed = true;
                }
            }
            let _ = self.to_host.send(b'Y');
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn device() -> (Device, HostReader, HostWriter) {
    let (tx, rx) = mpsc::channel();
    let state = Arc::new(Mutex::new(DeviceState::default()));
    let hung_up = Arc::new(AtomicBool::new(false));
    let device = Device {
        state: Arc::clone(&state),
        to_host: tx.clone(),
        hung_up: Arc::clone(&hung_up),
    };
    let reader = HostReader { rx, hung_up };
    let writer = HostWriter {
        pending: Vec::new(),
        state,
        to_host: tx,
    };
    (device, reader, writer)
}

/// Link over a simulated device that is already past its ready handshake.
pub fn connected() -> (Device, StepperLink) {
    let config = LinkConfig {
        wait_for_ready: false,
        ..LinkConfig::default()
    };
    let (device, reader, writer) = device();
    let link = StepperLink::from_io(reader, writer, &config).unwrap();
    (device, link)
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}
