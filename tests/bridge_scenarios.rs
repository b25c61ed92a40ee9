use std::sync::atomic::AtomicBool;
use std::time::Duration;

use depth_presence::ingest::{ScriptStep, ScriptedDepthSource, SyntheticDepthSource};
use depth_presence::{
    BridgeLoop, BridgeOptions, BridgeState, DepthFrameSource, DepthThresholds, MemoryPublisher,
    SourceConfig,
};

const WIDTH: u32 = 100;
const HEIGHT: u32 = 100;
const PRESENCE: &str = "kinect/room/presence";
const DISTANCE: &str = "kinect/room/min_distance";
const COUNT: &str = "kinect/room/person_count";

fn options(max_cycles: u64) -> BridgeOptions {
    BridgeOptions {
        thresholds: DepthThresholds::default(),
        cycle_interval: Duration::from_millis(1),
        discovery: None,
        availability_topic: None,
        max_cycles: Some(max_cycles),
        ..BridgeOptions::default()
    }
}

fn frame_with(qualifying: usize, near_mm: f32) -> ScriptStep {
    ScriptStep::with_near_pixels(WIDTH, HEIGHT, qualifying, near_mm)
}

fn run(
    steps: Vec<ScriptStep>,
    publisher: MemoryPublisher,
) -> BridgeLoop<ScriptedDepthSource, MemoryPublisher> {
    let cycles = steps.len() as u64;
    let source = ScriptedDepthSource::new(WIDTH, HEIGHT, steps);
    let mut bridge = BridgeLoop::new(source, publisher, options(cycles));
    bridge.run(&AtomicBool::new(false)).expect("bridge run");
    bridge
}

#[test]
fn scenario_a_occupied_room_turns_presence_on() {
    let bridge = run(vec![frame_with(6000, 1500.0)], MemoryPublisher::new());
    let publisher = bridge.publisher();

    assert_eq!(publisher.payloads(COUNT), vec!["1"]);
    assert_eq!(publisher.payloads(DISTANCE), vec!["1500"]);
    assert_eq!(publisher.payloads(PRESENCE), vec!["OFF", "ON"]);

    let presence: Vec<_> = publisher
        .messages()
        .iter()
        .filter(|m| m.topic == PRESENCE)
        .collect();
    assert!(presence.iter().all(|m| m.retained));
    let count = publisher.messages().iter().find(|m| m.topic == COUNT).unwrap();
    assert!(!count.retained);
}

#[test]
fn scenario_b_fewer_pixels_after_a_turns_presence_off() {
    let bridge = run(
        vec![frame_with(6000, 1500.0), frame_with(4000, 2100.0)],
        MemoryPublisher::new(),
    );
    let publisher = bridge.publisher();

    assert_eq!(publisher.payloads(PRESENCE), vec!["OFF", "ON", "OFF"]);
    assert_eq!(publisher.payloads(COUNT), vec!["1", "0"]);
    assert_eq!(publisher.payloads(DISTANCE), vec!["1500", "2100"]);
    assert!(!bridge.tracker().committed());
}

#[test]
fn scenario_c_all_dropouts_report_zero_distance_without_presence_traffic() {
    let bridge = run(vec![frame_with(0, 0.0), frame_with(0, 0.0)], MemoryPublisher::new());
    let publisher = bridge.publisher();

    assert_eq!(publisher.payloads(DISTANCE), vec!["0", "0"]);
    assert_eq!(publisher.payloads(COUNT), vec!["0", "0"]);
    // Only the startup marker.
    assert_eq!(publisher.payloads(PRESENCE), vec!["OFF"]);
    assert_eq!(bridge.stats().transitions, 0);
}

#[test]
fn threshold_equality_is_not_presence() {
    let bridge = run(vec![frame_with(5000, 1000.0)], MemoryPublisher::new());
    assert_eq!(bridge.publisher().payloads(COUNT), vec!["0"]);
    assert_eq!(bridge.publisher().payloads(PRESENCE), vec!["OFF"]);
}

#[test]
fn failed_presence_publish_is_reoffered_until_it_succeeds() {
    let mut publisher = MemoryPublisher::new();
    // Startup OFF, then two ON attempts fail.
    publisher.fail_next(PRESENCE, 3);
    let steps = (0..4).map(|_| frame_with(6000, 1500.0)).collect();
    let bridge = run(steps, publisher);

    let publisher = bridge.publisher();
    assert_eq!(publisher.payloads(PRESENCE), vec!["ON"]);
    assert_eq!(publisher.failed_attempts(), 3);
    assert_eq!(publisher.payloads(COUNT).len(), 4);
    assert_eq!(bridge.stats().transitions, 1);
}

#[test]
fn lost_startup_off_reaches_the_bus_on_the_next_cycle() {
    let mut publisher = MemoryPublisher::new();
    publisher.fail_next(PRESENCE, 1);
    let bridge = run(vec![frame_with(100, 2500.0), frame_with(100, 2500.0)], publisher);

    let presence: Vec<_> = bridge
        .publisher()
        .messages()
        .iter()
        .filter(|m| m.topic == PRESENCE)
        .collect();
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[0].payload, "OFF");
    assert!(presence[0].retained);
    assert_eq!(bridge.stats().transitions, 0);
}

#[test]
fn transient_acquisition_failures_are_skipped() {
    let steps = vec![
        frame_with(6000, 1500.0),
        ScriptStep::Fail("usb hiccup".to_string()),
        ScriptStep::Fail("usb hiccup".to_string()),
        frame_with(100, 1500.0),
    ];
    let bridge = run(steps, MemoryPublisher::new());

    assert_eq!(bridge.stats().acquisition_failures, 2);
    assert_eq!(bridge.stats().frames_processed, 2);
    assert_eq!(bridge.publisher().payloads(PRESENCE), vec!["OFF", "ON", "OFF"]);
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[test]
fn every_exit_path_stops_source_and_disconnects() {
    let publisher = MemoryPublisher::new().failing_connect("connection refused");
    let source = ScriptedDepthSource::new(WIDTH, HEIGHT, vec![frame_with(6000, 1500.0)]);
    let mut bridge = BridgeLoop::new(source, publisher, options(1));

    let err = bridge.run(&AtomicBool::new(false)).unwrap_err();
    assert_eq!(err.kind(), "initialization");
    assert_eq!(bridge.source().stop_calls(), 1);
    assert_eq!(bridge.publisher().disconnect_calls(), 1);
    assert!(!bridge.source().is_started());
}

#[test]
fn synthetic_room_produces_alternating_presence() {
    let config = SourceConfig {
        uri: "stub://scenario".to_string(),
        width: 64,
        height: 48,
        ..SourceConfig::default()
    };
    let source = SyntheticDepthSource::with_seed(config, 42);
    let mut opts = options(80);
    opts.thresholds = DepthThresholds::new(3800.0, 300);
    let mut bridge = BridgeLoop::new(source, MemoryPublisher::new(), opts);
    let stats = bridge.run(&AtomicBool::new(false)).expect("bridge run");

    assert_eq!(stats.frames_processed, 80);
    assert_eq!(
        bridge.publisher().payloads(PRESENCE),
        vec!["OFF", "ON", "OFF", "ON"]
    );
    assert_eq!(bridge.source().stats().frames_released, 80);
}

#[test]
fn discovery_and_initial_off_precede_first_cycle() {
    let source = ScriptedDepthSource::new(WIDTH, HEIGHT, vec![frame_with(6000, 1500.0)]);
    let mut opts = BridgeOptions::default();
    opts.cycle_interval = Duration::from_millis(1);
    opts.max_cycles = Some(1);
    let mut bridge = BridgeLoop::new(source, MemoryPublisher::new(), opts);
    bridge.run(&AtomicBool::new(false)).expect("bridge run");

    let topics: Vec<&str> = bridge
        .publisher()
        .messages()
        .iter()
        .map(|m| m.topic.as_str())
        .collect();
    assert_eq!(
        &topics[..4],
        &[
            "homeassistant/binary_sensor/kinect_room/presence/config",
            "homeassistant/sensor/kinect_room/min_distance/config",
            "homeassistant/sensor/kinect_room/person_count/config",
            PRESENCE,
        ]
    );
}
