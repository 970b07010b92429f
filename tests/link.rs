mod common;

use common::{connected, device, wait_until};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stepper_link::constants::MAX_IN_FLIGHT;
use stepper_link::{
    bound_ramp, ConstantSpeedDescriptor, DecodedFrame, FatalCause, Frame, LinkConfig, LinkError,
    LinkEventKind, RampDescriptor, StepperLink,
};

#[test]
fn first_frame_waits_for_device_ready() {
    let (device, reader, writer) = device();
    let link = StepperLink::from_io(reader, writer, &LinkConfig::default()).unwrap();

    // stale output from before the board reset must not trip the parser
    device.send(b"garbage|boot\n");
    link.send_homing().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(device.frame_count(), 0);
    assert!(link.fatal().is_none());

    device.send(b"I");
    link.flush().unwrap();
    assert_eq!(device.frame_count(), 1);
    assert_eq!(Frame::decode(&device.frames()[0]).unwrap(), DecodedFrame::Homing);
}

#[test]
fn subscriber_sees_ready_not_connected_before_handshake() {
    let (device, reader, writer) = device();
    let link = StepperLink::from_io(reader, writer, &LinkConfig::default()).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    link.subscribe(move |event| sink.lock().push(event.kind.clone()));
    assert!(events.lock().is_empty());

    device.send(b"I");
    wait_until("ready", || events.lock().contains(&LinkEventKind::Ready));
    assert!(!events.lock().contains(&LinkEventKind::Connected));

    let late = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&late);
    link.subscribe(move |event| sink.lock().push(event.kind.clone()));
    assert_eq!(late.lock()[0], LinkEventKind::Connected);
}

#[test]
fn frames_arrive_in_enqueue_order() {
    let (device, link) = connected();
    let accel = bound_ramp(2000, 200, 30000).unwrap();
    let xy = RampDescriptor::new(-40, 900, 12, 700).unwrap();
    link.send_ramp(&accel, Some(&xy)).unwrap();
    link.send_constant(&ConstantSpeedDescriptor::new(1000, 200).unwrap(), None)
        .unwrap();
    link.send_ramp(&accel.invert().unwrap(), None).unwrap();
    link.flush().unwrap();

    let decoded: Vec<DecodedFrame> = device
        .frames()
        .iter()
        .map(|f| Frame::decode(f).unwrap())
        .collect();
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[0], DecodedFrame::Ramp(accel, xy));
    assert!(matches!(decoded[1], DecodedFrame::Constant(a, b) if a == b && a.step_count == 1000));
    assert!(matches!(decoded[2], DecodedFrame::Ramp(a, _) if a.end_period == 2000));
}

#[test]
fn zero_step_instructions_are_not_sent() {
    let (device, link) = connected();
    link.send_ramp(&bound_ramp(500, 500, 100).unwrap(), None).unwrap();
    link.send_constant(&ConstantSpeedDescriptor::new(0, 300).unwrap(), None)
        .unwrap();
    link.flush().unwrap();
    assert_eq!(device.frame_count(), 0);
    assert_eq!(link.incomplete_count(), 0);
}

#[test]
fn window_stops_at_device_queue_depth() {
    let (device, link) = connected();
    for _ in 0..10 {
        link.send_homing().unwrap();
    }

    wait_until("window to fill", || device.frame_count() == MAX_IN_FLIGHT);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(device.frame_count(), MAX_IN_FLIGHT);
    assert_eq!(link.in_flight(), MAX_IN_FLIGHT);
    assert_eq!(link.incomplete_count(), 10);

    device.complete(3);
    wait_until("queue to drain", || device.frame_count() == 10);
    link.flush().unwrap();
    assert_eq!(link.incomplete_count(), MAX_IN_FLIGHT);

    device.complete(MAX_IN_FLIGHT);
    wait_until("completions", || link.incomplete_count() == 0);
    assert!(!device.overflowed());
}

#[test]
fn smaller_configured_window_is_honoured() {
    let config = LinkConfig {
        wait_for_ready: false,
        max_in_flight: 2,
        ..LinkConfig::default()
    };
    let (device, reader, writer) = device();
    let link = StepperLink::from_io(reader, writer, &config).unwrap();
    for _ in 0..4 {
        link.send_homing().unwrap();
    }
    wait_until("two frames", || device.frame_count() == 2);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(device.frame_count(), 2);
    device.complete(2);
    wait_until("remaining frames", || device.frame_count() == 4);
}

#[test]
fn ready_resets_in_flight_count() {
    let (device, link) = connected();
    for _ in 0..3 {
        link.send_homing().unwrap();
    }
    link.flush().unwrap();
    assert_eq!(link.in_flight(), 3);

    device.reset();
    wait_until("reset", || link.in_flight() == 0);
    assert!(link.fatal().is_none());
}

#[test]
fn device_error_ends_the_session() {
    let (device, link) = connected();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    link.subscribe(move |event| sink.lock().push(event.kind.clone()));

    device.send(b"E");
    wait_until("fatal", || link.fatal().is_some());
    assert_eq!(link.fatal(), Some(FatalCause::DeviceReportedError));
    assert!(matches!(
        link.send_homing(),
        Err(LinkError::Session(FatalCause::DeviceReportedError))
    ));
    assert!(link.flush().is_err());

    let events = events.lock();
    assert_eq!(events[0], LinkEventKind::Connected);
    assert!(events.contains(&LinkEventKind::Fatal(FatalCause::DeviceReportedError)));
}

#[test]
fn unknown_status_byte_is_fatal() {
    let (device, link) = connected();
    device.send(b"YQ");
    wait_until("fatal", || link.fatal().is_some());
    assert_eq!(link.fatal(), Some(FatalCause::UnknownStatus(b'Q')));
}

#[test]
fn hang_up_is_reported() {
    let (device, link) = connected();
    device.hang_up();
    wait_until("fatal", || link.fatal().is_some());
    assert_eq!(link.fatal(), Some(FatalCause::LinkClosed));
    assert!(link.send_homing().is_err());
}

#[test]
fn comments_reach_subscribers() {
    let (device, link) = connected();
    let comments = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&comments);
    link.subscribe(move |event| {
        if let LinkEventKind::Comment(text) = &event.kind {
            sink.lock().push(text.clone());
        }
    });

    device.send(b"S|buffer 3/7\n");
    wait_until("comment", || !comments.lock().is_empty());
    assert_eq!(comments.lock()[0], "buffer 3/7");
    assert!(link.fatal().is_none());
}

#[test]
fn concurrent_producers_never_exceed_window() {
    let (device, link) = connected();
    let link = Arc::new(link);
    const PRODUCERS: i16 = 4;
    const PER_PRODUCER: i16 = 40;

    let firmware = {
        let device = device.clone();
        thread::spawn(move || {
            let total = (PRODUCERS * PER_PRODUCER) as usize;
            let mut completed = 0;
            while completed < total {
                if device.queued() > 0 {
                    device.complete(1);
                    completed += 1;
                }
                thread::sleep(Duration::from_micros(300));
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let segment = ConstantSpeedDescriptor::new(p * 100 + i + 1, 500).unwrap();
                    link.send_constant(&segment, None).unwrap();
                    assert!(link.in_flight() <= MAX_IN_FLIGHT);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    firmware.join().unwrap();

    wait_until("backlog to clear", || link.incomplete_count() == 0);
    assert!(link.peak_in_flight() <= MAX_IN_FLIGHT);
    assert!(device.max_queued() <= MAX_IN_FLIGHT);
    assert!(!device.overflowed());

    // each producer's frames keep their relative order on the wire
    let mut last_seen = vec![0i16; PRODUCERS as usize];
    for frame in device.frames() {
        let steps = match Frame::decode(&frame).unwrap() {
            DecodedFrame::Constant(a, _) => a.step_count,
            other => panic!("unexpected {other:?}"),
        };
        let producer = ((steps - 1) / 100) as usize;
        assert!(steps > last_seen[producer]);
        last_seen[producer] = steps;
    }
    assert_eq!(device.frame_count(), (PRODUCERS * PER_PRODUCER) as usize);
}
