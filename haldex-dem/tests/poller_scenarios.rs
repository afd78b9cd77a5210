// End-to-end poller scenarios against the simulated DEM module
use haldex_dem::codec::{encode_response, REQUEST_ID, RESPONSE_ID};
use haldex_dem::{
    DemError, DemPoller, Outcome, PollerConfig, RawFrame, RequestState, SensorId, SimValues,
    SimulatedDem,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config() -> PollerConfig {
    PollerConfig::new()
        .with_request_timeout(Duration::from_millis(150))
        .with_min_poll_interval(Duration::from_millis(5))
        .with_receive_slice(Duration::from_millis(5))
}

fn start(values: SimValues) -> (Arc<SimulatedDem>, DemPoller) {
    init_logging();
    let sim = Arc::new(SimulatedDem::new(values));
    let poller = DemPoller::new(Arc::clone(&sim), test_config()).unwrap();
    (sim, poller)
}

#[test]
fn test_oil_temperature_single_frame() {
    let (sim, poller) = start(SimValues {
        oil_temperature: 13,
        ..SimValues::default()
    });

    let readings = poller.poll(SensorId::OilTemperature).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].name, "oil_temperature");
    assert_eq!(readings[0].raw_value, 13);
    assert_eq!(readings[0].unit, "°C");

    let sent = sim.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, REQUEST_ID);
    assert_eq!(sent[0].data, [0xCD, 0x1A, 0xA6, 0x00, 0x02, 0x01, 0x00, 0x00]);
}

#[test]
fn test_pump_current_pair() {
    let (_sim, poller) = start(SimValues::default());

    let readings = poller.poll_sensor("pump_current").unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].name, "pump_current");
    assert_eq!(readings[0].raw_value, 1234);
    assert_eq!(readings[1].name, "solenoid_current");
    assert_eq!(readings[1].raw_value, 567);
}

#[test]
fn test_wheel_speeds_multi_frame() {
    let (_sim, poller) = start(SimValues {
        wheel_speeds_raw: [400, 410, 420, 430],
        ..SimValues::default()
    });

    let readings = poller.poll(SensorId::WheelSpeeds).unwrap();
    let names: Vec<&str> = readings.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["wheel_speed_fl", "wheel_speed_fr", "wheel_speed_rl", "wheel_speed_rr"]
    );
    let raws: Vec<i64> = readings.iter().map(|r| r.raw_value).collect();
    assert_eq!(raws, vec![400, 410, 420, 430]);
    assert!((readings[0].physical_value - 6.24).abs() < 1e-9);
}

#[test]
fn test_timeout_frees_slot() {
    let (sim, poller) = start(SimValues::default());
    sim.silence(SensorId::OilPressure);

    match poller.poll(SensorId::OilPressure) {
        Err(DemError::Timeout { sensor, timeout_ms }) => {
            assert_eq!(sensor, SensorId::OilPressure);
            assert_eq!(timeout_ms, 150);
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    let state = poller.poll_state(SensorId::OilPressure);
    assert_eq!(state.state, RequestState::Idle);
    assert_eq!(state.last_outcome, Some(Outcome::TimedOut));
    assert_eq!(state.consecutive_timeouts, 1);

    // Slot is free again right away
    sim.wake(SensorId::OilPressure);
    let readings = poller.poll(SensorId::OilPressure).unwrap();
    assert_eq!(readings[0].raw_value, 122);
    assert_eq!(poller.poll_state(SensorId::OilPressure).consecutive_timeouts, 0);
}

#[test]
fn test_late_response_is_unsolicited() {
    let (sim, poller) = start(SimValues::default());
    let unsolicited = poller.subscribe_unsolicited();
    sim.silence(SensorId::OilTemperature);

    assert!(poller.poll(SensorId::OilTemperature).is_err());

    for frame in encode_response(0x0002, &[0x14, 0x00]) {
        sim.inject(frame);
    }
    let readings = unsolicited.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(readings[0].raw_value, 20);
}

#[test]
fn test_concurrent_sensors_in_flight() {
    let (_sim, poller) = start(SimValues::default());

    let pump = poller.request_sensor(SensorId::PumpCurrent).unwrap();
    let wheels = poller.request_sensor(SensorId::WheelSpeeds).unwrap();
    let pressure = poller.request_sensor(SensorId::OilPressure).unwrap();

    assert_eq!(wheels.wait().unwrap().len(), 4);
    assert_eq!(pump.wait().unwrap().len(), 2);
    assert_eq!(pressure.wait().unwrap().len(), 1);
}

#[test]
fn test_requests_from_several_threads() {
    let (_sim, poller) = start(SimValues::default());
    let poller = Arc::new(poller);

    let handles: Vec<_> = SensorId::ALL
        .into_iter()
        .map(|sensor| {
            let poller = Arc::clone(&poller);
            thread::spawn(move || poller.poll(sensor).map(|r| r.len()))
        })
        .collect();

    let counts: Vec<usize> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert_eq!(counts, vec![2, 1, 1, 4]);
}

#[test]
fn test_keep_alive_sends_and_forwards() {
    let (sim, poller) = start(SimValues::default());
    let unsolicited = poller.subscribe_unsolicited();

    poller.start_keep_alive(Duration::from_millis(20)).unwrap();
    let readings = unsolicited.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(readings[0].name, "oil_temperature");

    thread::sleep(Duration::from_millis(70));
    poller.stop_keep_alive();
    assert!(!poller.keep_alive_running());

    let sent = sim.sent_frames();
    assert!(sent.len() >= 2, "only {} keep-alive frames", sent.len());
    assert!(sent.iter().all(|f| f.data[4] == 0x02));

    // Keep-alive never blocks a regular request for the same sensor
    assert!(poller.poll(SensorId::OilTemperature).is_ok());

    let count = sim.sent_frames().len();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(sim.sent_frames().len(), count);
}

#[test]
fn test_keep_alive_restart() {
    let (_sim, poller) = start(SimValues::default());

    poller.start_keep_alive(Duration::from_millis(50)).unwrap();
    poller.start_keep_alive(Duration::from_millis(10)).unwrap();
    assert!(poller.keep_alive_running());

    poller.stop_keep_alive();
    poller.stop_keep_alive();
    assert!(!poller.keep_alive_running());
}

#[test]
fn test_noise_does_not_disturb_polling() {
    let (sim, poller) = start(SimValues::default());

    // Foreign identifier, invalid control byte, negative response type
    sim.inject(RawFrame::new(0x0000_0123, [0xCE, 0x1A, 0xE6, 0x00, 0x02, 0x11, 0, 0]));
    sim.inject(RawFrame::new(RESPONSE_ID, [0x00, 0x1A, 0xE6, 0x00, 0x02, 0x11, 0, 0]));
    sim.inject(RawFrame::new(RESPONSE_ID, [0xCE, 0x1A, 0x7F, 0x00, 0x02, 0x11, 0, 0]));

    let readings = poller.poll(SensorId::OilPressure).unwrap();
    assert_eq!(readings[0].raw_value, 122);
}

#[test]
fn test_cancel_then_request_again() {
    let (sim, poller) = start(SimValues::default());
    sim.silence(SensorId::WheelSpeeds);

    let pending = poller.request_sensor(SensorId::WheelSpeeds).unwrap();
    assert!(matches!(
        poller.request_sensor(SensorId::WheelSpeeds),
        Err(DemError::AlreadyInFlight { .. })
    ));
    pending.cancel();
    assert_eq!(
        poller.poll_state(SensorId::WheelSpeeds).last_outcome,
        Some(Outcome::Cancelled)
    );

    sim.wake(SensorId::WheelSpeeds);
    assert_eq!(poller.poll(SensorId::WheelSpeeds).unwrap().len(), 4);
}

#[test]
fn test_poll_all_continues_past_failures() {
    let (sim, poller) = start(SimValues::default());
    sim.silence(SensorId::OilPressure);

    let results = poller.poll_all();
    assert_eq!(results.len(), 4);
    for (sensor, result) in results {
        if sensor == SensorId::OilPressure {
            assert!(matches!(result, Err(DemError::Timeout { .. })));
        } else {
            assert!(result.is_ok(), "{} failed", sensor);
        }
    }
}

#[test]
fn test_shutdown_rejects_new_requests() {
    let (sim, poller) = start(SimValues::default());
    sim.silence(SensorId::PumpCurrent);

    let pending = poller.request_sensor(SensorId::PumpCurrent).unwrap();
    poller.shutdown();

    assert!(matches!(pending.wait(), Err(DemError::Shutdown)));
}
