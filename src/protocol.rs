use crate::codec::{encode_pair, hex, Frame};
use crate::config::LinkConfig;
use crate::constants::*;
use crate::error::{FatalCause, LinkError, Result};
use crate::types::{ConstantSpeedDescriptor, Instruction, RampDescriptor};
use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Status reported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ready,
    Acknowledged,
    Finished,
    SchedulerEnabled,
    Comment(String),
}

/// Byte-at-a-time parser for the device's status stream.
///
/// Comment regions (`|` up to a newline) are collected and returned whole,
/// or in pieces of [`MAX_COMMENT_LENGTH`] bytes when the device never ends them.
/// While draining, everything before the first `I` is stale output from
/// before the link was opened and is discarded.
#[derive(Debug, Default)]
pub struct StatusParser {
    comment: Option<Vec<u8>>,
    draining: bool,
}

impl StatusParser {
    pub fn new(draining: bool) -> Self {
        Self {
            comment: None,
            draining,
        }
    }

    pub fn feed(&mut self, byte: u8) -> std::result::Result<Option<Status>, FatalCause> {
        if let Some(text) = self.comment.as_mut() {
            if byte == COMMENT_END {
                let text = String::from_utf8_lossy(text).into_owned();
                self.comment = None;
                return Ok(Some(Status::Comment(text)));
            }
            text.push(byte);
            if text.len() >= MAX_COMMENT_LENGTH {
                // still inside the comment; the rest follows as another piece
                let text = String::from_utf8_lossy(&std::mem::take(text)).into_owned();
                return Ok(Some(Status::Comment(text)));
            }
            return Ok(None);
        }

        if byte == COMMENT_START {
            self.comment = Some(Vec::new());
            return Ok(None);
        }

        if self.draining {
            if byte != STATUS_READY {
                trace!("Discarding stale byte {:#04x}", byte);
                return Ok(None);
            }
            self.draining = false;
        }

        match byte {
            STATUS_READY => Ok(Some(Status::Ready)),
            STATUS_ACK => Ok(Some(Status::Acknowledged)),
            STATUS_FINISHED => Ok(Some(Status::Finished)),
            STATUS_SCHEDULER => Ok(Some(Status::SchedulerEnabled)),
            STATUS_ERROR => Err(FatalCause::DeviceReportedError),
            other => Err(FatalCause::UnknownStatus(other)),
        }
    }
}

/// What happened on the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Connected,
    Disconnected,
    DataReceived(Vec<u8>),
    DataSent(Vec<u8>),
    Comment(String),
    Ready,
    Acknowledged,
    Finished,
    Fatal(FatalCause),
}

/// Timestamped diagnostics record handed to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub at: DateTime<Utc>,
    pub kind: LinkEventKind,
}

type EventHook = Box<dyn Fn(&LinkEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct SendQueue {
    frames: VecDeque<Frame>,
    closed: bool,
}

#[derive(Debug, Default)]
struct FlowState {
    awaiting_ack: bool,
    device_ready: bool,
    in_flight: usize,
    peak_in_flight: usize,
    fatal: Option<FatalCause>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<SendQueue>,
    queue_changed: Condvar,
    flow: Mutex<FlowState>,
    flow_changed: Condvar,
    hooks: Mutex<Vec<EventHook>>,
    max_in_flight: usize,
}

impl Shared {
    fn emit(&self, kind: LinkEventKind) {
        let hooks = self.hooks.lock();
        if hooks.is_empty() {
            return;
        }
        let event = LinkEvent { at: Utc::now(), kind };
        for hook in hooks.iter() {
            hook(&event);
        }
    }

    /// Record the first fatal cause and wake every waiter.
    fn abort(&self, cause: FatalCause) {
        {
            let mut flow = self.flow.lock();
            if flow.shutdown || flow.fatal.is_some() {
                return;
            }
            error!("Stopping motion: {}", cause);
            flow.fatal = Some(cause.clone());
            self.flow_changed.notify_all();
        }
        self.close_queue();
        self.emit(LinkEventKind::Fatal(cause));
        self.emit(LinkEventKind::Disconnected);
    }

    fn close_queue(&self) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        self.queue_changed.notify_all();
    }

    fn apply(&self, status: Status) {
        match status {
            Status::Ready => {
                {
                    let mut flow = self.flow.lock();
                    flow.awaiting_ack = false;
                    flow.device_ready = true;
                    flow.in_flight = 0;
                    self.flow_changed.notify_all();
                }
                info!("Device ready");
                self.emit(LinkEventKind::Ready);
            }
            Status::Acknowledged => {
                {
                    let mut flow = self.flow.lock();
                    flow.awaiting_ack = false;
                    self.flow_changed.notify_all();
                }
                self.emit(LinkEventKind::Acknowledged);
            }
            Status::Finished => {
                {
                    let mut flow = self.flow.lock();
                    if flow.in_flight == 0 {
                        warn!("Completion reported with nothing in flight");
                    }
                    flow.in_flight = flow.in_flight.saturating_sub(1);
                    self.flow_changed.notify_all();
                }
                self.emit(LinkEventKind::Finished);
            }
            Status::SchedulerEnabled => debug!("Device step scheduler enabled"),
            Status::Comment(text) => {
                debug!("Device: {}", text);
                self.emit(LinkEventKind::Comment(text));
            }
        }
    }

    fn check(&self) -> Result<()> {
        match &self.flow.lock().fatal {
            Some(cause) => Err(LinkError::Session(cause.clone())),
            None => Ok(()),
        }
    }
}

/// Flow-controlled link to the stepper controller.
///
/// Frames are queued without blocking and written by a sender thread, one at
/// a time, each waiting for the device's acknowledgement. At most
/// `max_in_flight` instructions are outstanding on the device at once; a
/// receiver thread turns the status stream into acknowledgements and
/// completions. A malformed status or a device error ends the session: the
/// queue is closed and every later call fails with [`LinkError::Session`].
pub struct StepperLink {
    shared: Arc<Shared>,
    sender: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl StepperLink {
    /// Open the serial port named in `config` and start both workers
    pub fn open(config: &LinkConfig) -> Result<Self> {
        config.validate()?;
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(config.read_timeout())
            .open()?;
        port.clear(serialport::ClearBuffer::All)?;
        let reader = port.try_clone()?;
        info!("Opened {} at {} baud", config.port, config.baud_rate);
        Self::from_io(reader, port, config)
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }

    /// Run the protocol over an arbitrary byte stream pair.
    ///
    /// `reader` should return `TimedOut` or `WouldBlock` periodically when
    /// idle so the receiver can notice shutdown.
    pub fn from_io<R, W>(reader: R, writer: W, config: &LinkConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        config.validate()?;
        let shared = Arc::new(Shared {
            queue: Mutex::new(SendQueue::default()),
            queue_changed: Condvar::new(),
            flow: Mutex::new(FlowState {
                awaiting_ack: config.wait_for_ready,
                device_ready: !config.wait_for_ready,
                ..FlowState::default()
            }),
            flow_changed: Condvar::new(),
            hooks: Mutex::new(Vec::new()),
            max_in_flight: config.max_in_flight,
        });

        let parser = StatusParser::new(config.wait_for_ready);
        let receiver = {
            let shared = Arc::clone(&shared);
            let trace_rx = config.trace_rx;
            thread::Builder::new()
                .name("link-receiver".to_string())
                .spawn(move || receive_loop(&shared, reader, parser, trace_rx))?
        };
        let sender = {
            let shared = Arc::clone(&shared);
            let trace_tx = config.trace_tx;
            thread::Builder::new()
                .name("link-sender".to_string())
                .spawn(move || send_loop(&shared, writer, trace_tx))?
        };

        Ok(Self {
            shared,
            sender: Some(sender),
            receiver: Some(receiver),
        })
    }

    /// Register a diagnostics observer. Hooks run on the worker threads and
    /// must not call back into the link's subscription.
    ///
    /// The new hook immediately receives `Connected` once the device has
    /// reported ready, or the fatal cause of a dead session. Before the
    /// ready byte it gets nothing and sees `Ready` when it arrives.
    pub fn subscribe<F>(&self, hook: F)
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        // hooks stay locked until the new one is in place so no event slips past it
        let mut hooks = self.shared.hooks.lock();
        let initial = {
            let flow = self.shared.flow.lock();
            match (&flow.fatal, flow.device_ready) {
                (Some(cause), _) => Some(LinkEventKind::Fatal(cause.clone())),
                (None, true) => Some(LinkEventKind::Connected),
                (None, false) => None,
            }
        };
        if let Some(kind) = initial {
            hook(&LinkEvent { at: Utc::now(), kind });
        }
        hooks.push(Box::new(hook));
    }

    /// Queue a ramp for the UV pair, and for the XY pair if given.
    pub fn send_ramp(&self, uv: &RampDescriptor, xy: Option<&RampDescriptor>) -> Result<()> {
        let xy = xy.map(|r| Instruction::Ramp(*r));
        self.send_instructions(&Instruction::Ramp(*uv), xy.as_ref())
    }

    /// Queue a constant-speed segment for the UV pair, and for the XY pair if given.
    pub fn send_constant(
        &self,
        uv: &ConstantSpeedDescriptor,
        xy: Option<&ConstantSpeedDescriptor>,
    ) -> Result<()> {
        let xy = xy.map(|c| Instruction::Constant(*c));
        self.send_instructions(&Instruction::Constant(*uv), xy.as_ref())
    }

    /// Queue one frame. Without an XY instruction both pairs get `uv`.
    pub fn send_instructions(&self, uv: &Instruction, xy: Option<&Instruction>) -> Result<()> {
        self.shared.check()?;
        match encode_pair(uv, xy)? {
            Some(frame) => self.enqueue(frame),
            None => {
                debug!("Skipping zero-step {} instruction", uv.kind());
                Ok(())
            }
        }
    }

    pub fn send_homing(&self) -> Result<()> {
        self.shared.check()?;
        self.enqueue(Frame::homing())
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            drop(queue);
            self.shared.check()?;
            return Err(LinkError::Session(FatalCause::LinkClosed));
        }
        queue.frames.push_back(frame);
        self.shared.queue_changed.notify_all();
        Ok(())
    }

    /// Instructions queued or executing on the device.
    pub fn incomplete_count(&self) -> usize {
        let in_flight = self.shared.flow.lock().in_flight;
        in_flight + self.shared.queue.lock().frames.len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.flow.lock().in_flight
    }

    /// Highest in-flight count observed since the link was opened.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.flow.lock().peak_in_flight
    }

    pub fn fatal(&self) -> Option<FatalCause> {
        self.shared.flow.lock().fatal.clone()
    }

    pub fn check(&self) -> Result<()> {
        self.shared.check()
    }

    /// Block until every queued frame has been written and acknowledged.
    ///
    /// On a link still waiting for the device's ready byte this also waits
    /// for that.
    pub fn flush(&self) -> Result<()> {
        {
            let mut queue = self.shared.queue.lock();
            while !queue.frames.is_empty() && !queue.closed {
                self.shared.queue_changed.wait(&mut queue);
            }
        }
        let mut flow = self.shared.flow.lock();
        while flow.awaiting_ack && flow.fatal.is_none() && !flow.shutdown {
            self.shared.flow_changed.wait(&mut flow);
        }
        match &flow.fatal {
            Some(cause) => Err(LinkError::Session(cause.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for StepperLink {
    fn drop(&mut self) {
        {
            let mut flow = self.shared.flow.lock();
            flow.shutdown = true;
            self.shared.flow_changed.notify_all();
        }
        self.shared.close_queue();
        for handle in [self.sender.take(), self.receiver.take()].into_iter().flatten() {
            if handle.join().is_err() {
                error!("Link worker panicked");
            }
        }
        self.shared.emit(LinkEventKind::Disconnected);
    }
}

fn send_loop<W: Write>(shared: &Shared, mut writer: W, trace_tx: bool) {
    loop {
        // the frame stays queued until its slot is reserved so the backlog never under-counts
        let frame = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.closed {
                    return;
                }
                if let Some(frame) = queue.frames.front() {
                    break *frame;
                }
                shared.queue_changed.wait(&mut queue);
            }
        };

        {
            let mut flow = shared.flow.lock();
            while flow.fatal.is_none()
                && !flow.shutdown
                && (flow.awaiting_ack || flow.in_flight >= shared.max_in_flight)
            {
                shared.flow_changed.wait(&mut flow);
            }
            if flow.fatal.is_some() || flow.shutdown {
                return;
            }
            flow.in_flight += 1;
            flow.peak_in_flight = flow.peak_in_flight.max(flow.in_flight);
            flow.awaiting_ack = true;
        }

        {
            let mut queue = shared.queue.lock();
            queue.frames.pop_front();
            shared.queue_changed.notify_all();
        }

        if trace_tx {
            debug!("Sending:  {}", hex(frame.as_bytes()));
        }
        if let Err(e) = writer.write_all(frame.as_bytes()).and_then(|_| writer.flush()) {
            shared.abort(FatalCause::Io(e.to_string()));
            return;
        }
        shared.emit(LinkEventKind::DataSent(frame.as_bytes().to_vec()));
    }
}

fn receive_loop<R: Read>(shared: &Shared, mut reader: R, mut parser: StatusParser, trace_rx: bool) {
    let mut buf = [0u8; 64];
    loop {
        if shared.flow.lock().shutdown {
            return;
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                shared.abort(FatalCause::LinkClosed);
                return;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                shared.abort(FatalCause::Io(e.to_string()));
                return;
            }
        };

        if trace_rx {
            debug!("Received: {}", hex(&buf[..n]));
        }
        shared.emit(LinkEventKind::DataReceived(buf[..n].to_vec()));

        for &byte in &buf[..n] {
            match parser.feed(byte) {
                Ok(Some(status)) => shared.apply(status),
                Ok(None) => {}
                Err(cause) => {
                    shared.abort(cause);
                    return;
                }
            }
        }
    }
}
