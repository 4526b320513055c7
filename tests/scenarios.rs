use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;
use porton_gate::bridge::{BridgeEvent, MessagingBridge, CONTROL_TOPIC};
use porton_gate::gpi::{ButtonEdge, CommandSource, RemoteTrigger};
use porton_gate::io::GateIo;
use porton_gate::report::{StatusLine, StatusReporter};
use porton_gate::types::{
    FaultCode, IndicatorOutputs, MotorOutputs, SensorSnapshot, ToggleOrigin, RUN_TIME_MAX,
};
use porton_gate::{GateConfig, GateController, GateState};

const CLOSED: SensorSnapshot = SensorSnapshot::new(true, false);
const OPENED: SensorSnapshot = SensorSnapshot::new(false, true);
const TRANSIT: SensorSnapshot = SensorSnapshot::new(false, false);
const CONFLICT: SensorSnapshot = SensorSnapshot::new(true, true);

/// Run the self-test against `sensors` and return the controller after INIT
fn leave_init(config: GateConfig, sensors: SensorSnapshot) -> GateController {
    let mut gate = GateController::new(config);
    for _ in 0..config.self_test_ticks() {
        assert_eq!(gate.step(sensors), None);
    }
    assert!(gate.step(sensors).is_some());
    gate
}

fn settle(gate: &mut GateController, sensors: SensorSnapshot) {
    for _ in 0..gate.config().entry_settle_ticks() {
        assert_eq!(gate.step(sensors), None);
    }
}

#[test]
fn init_with_closed_switch_goes_to_close() {
    let gate = leave_init(GateConfig::default(), CLOSED);
    assert_eq!(gate.state(), GateState::Close);
    assert_eq!(gate.motors(), MotorOutputs::STOPPED);
    assert_eq!(gate.previous_state(), GateState::Init);
}

#[test]
fn init_in_transit_drives_closed() {
    let gate = leave_init(GateConfig::default(), TRANSIT);
    assert_eq!(gate.state(), GateState::Closing);
    assert!(gate.motors().motor_close());
    assert!(!gate.motors().motor_open());
    assert_eq!(gate.indicators(), IndicatorOutputs::closing());
}

#[test]
fn init_conflict_faults() {
    let gate = leave_init(GateConfig::default(), CONFLICT);
    assert_eq!(gate.state(), GateState::Fault);
    assert_eq!(gate.fault_code(), FaultCode::LimitSwitchConflict);
    assert_eq!(gate.motors(), MotorOutputs::STOPPED);
    assert_eq!(gate.indicators(), IndicatorOutputs::fault());
}

#[test]
fn opening_times_out_at_run_time_max_and_resumes() {
    let config = GateConfig::default();
    assert_eq!(config.run_time_max, RUN_TIME_MAX);

    let mut gate = leave_init(config, CLOSED);
    gate.request_toggle();
    gate.step(CLOSED);
    assert_eq!(gate.state(), GateState::Opening);

    settle(&mut gate, TRANSIT);
    for polls in 1..=RUN_TIME_MAX {
        assert_eq!(gate.step(TRANSIT), None);
        assert_eq!(gate.run_time_counter(), polls);
    }
    assert_eq!(gate.state(), GateState::Opening);

    gate.step(TRANSIT);
    assert_eq!(gate.state(), GateState::Fault);
    assert_eq!(gate.fault_code(), FaultCode::RunTimeExceeded);
    assert_eq!(gate.previous_state(), GateState::Opening);
    assert_eq!(gate.motors(), MotorOutputs::STOPPED);

    // nothing happens in FAULT without a toggle
    for _ in 0..100 {
        assert_eq!(gate.step(TRANSIT), None);
    }

    gate.request_toggle();
    gate.step(TRANSIT);
    assert_eq!(gate.state(), GateState::Opening);
    assert_eq!(gate.fault_code(), FaultCode::None);
    assert!(gate.motors().motor_open());
}

#[test]
fn toggle_in_open_starts_closing() {
    let mut gate = leave_init(GateConfig::default(), CLOSED);
    gate.request_toggle();
    gate.step(CLOSED);
    settle(&mut gate, TRANSIT);
    gate.step(TRANSIT);
    gate.step(OPENED);
    assert_eq!(gate.state(), GateState::Open);
    assert_eq!(gate.run_time_counter(), 1);

    gate.request_toggle();
    gate.step(OPENED);
    assert_eq!(gate.state(), GateState::Closing);
    assert!(!gate.toggle_pending());
    assert!(gate.motors().motor_close());
    assert_eq!(gate.run_time_counter(), 0);
}

#[test]
fn button_and_remote_in_one_poll_toggle_once() {
    let remote = RemoteTrigger::new();
    let mut source = CommandSource::new(ButtonEdge::new(false, 1), &remote);
    let mut gate = leave_init(GateConfig::default(), CLOSED);

    remote.trigger();
    let origin = source.poll(true);
    assert_eq!(origin, Some(ToggleOrigin::Both));
    gate.request_toggle();
    gate.step(CLOSED);
    assert_eq!(gate.state(), GateState::Opening);
    assert!(!gate.toggle_pending());

    // held button and an already consumed remote produce nothing more
    assert_eq!(source.poll(true), None);
    settle(&mut gate, CLOSED);
    gate.step(OPENED);
    assert_eq!(gate.state(), GateState::Open);
}

/// Gate that moves one unit per refresh while a motor is driven
struct SimulatedGate {
    position: u32,
    travel: u32,
    motors: MotorOutputs,
}

impl SimulatedGate {
    fn new(position: u32, travel: u32) -> Self {
        Self {
            position,
            travel,
            motors: MotorOutputs::STOPPED,
        }
    }
}

impl GateIo for SimulatedGate {
    fn write(&mut self, motors: MotorOutputs, _indicators: IndicatorOutputs) {
        assert!(!(motors.motor_open() && motors.motor_close()));
        self.motors = motors;
    }

    fn sample(&mut self) -> SensorSnapshot {
        if self.motors.motor_open() {
            self.position = (self.position + 1).min(self.travel);
        } else if self.motors.motor_close() {
            self.position = self.position.saturating_sub(1);
        }
        SensorSnapshot::new(self.position == 0, self.position == self.travel)
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// One control cycle, the same order the firmware loop uses
fn cycle(
    gate: &mut GateController,
    io: &mut SimulatedGate,
    source: &mut CommandSource<'_>,
    button: bool,
) {
    if source.poll(button).is_some() {
        gate.request_toggle();
    }
    let snapshot = block_on(io.refresh(gate.motors(), gate.indicators(), &mut NoDelay, 10));
    gate.step(snapshot);
}

fn run(
    gate: &mut GateController,
    io: &mut SimulatedGate,
    source: &mut CommandSource<'_>,
    reporter: &mut StatusReporter,
    polls: u32,
) {
    for _ in 0..polls {
        cycle(gate, io, source, false);
        reporter.observe(&gate.status());
    }
}

#[test]
fn closed_loop_remote_cycle() {
    let config = GateConfig::default()
        .with_entry_settle_ms(50)
        .with_run_time_max(500);
    let remote = RemoteTrigger::new();
    let mut bridge = MessagingBridge::new(&remote);
    let mut source = CommandSource::from_config(&config, false, &remote);
    let mut io = SimulatedGate::new(40, 200);
    let mut gate = GateController::new(config);
    let mut reporter = StatusReporter::new();

    run(&mut gate, &mut io, &mut source, &mut reporter, 200);
    assert_eq!(gate.state(), GateState::Close);

    bridge.handle(BridgeEvent::Connected);
    bridge.handle(BridgeEvent::Data {
        topic: CONTROL_TOPIC,
        payload: b"1",
    });
    assert_eq!(
        StatusLine::mandate(gate.state()).map(|l| l.to_string()),
        Some("MANDATO: ABRIR EL PORTON".to_string())
    );
    run(&mut gate, &mut io, &mut source, &mut reporter, 300);
    assert_eq!(gate.state(), GateState::Open);

    bridge.handle(BridgeEvent::Data {
        topic: CONTROL_TOPIC,
        payload: b"1",
    });
    run(&mut gate, &mut io, &mut source, &mut reporter, 300);
    assert_eq!(gate.state(), GateState::Close);
    assert_eq!(gate.fault_code(), FaultCode::None);
}

#[test]
fn closed_loop_stuck_gate_faults_and_recovers() {
    let config = GateConfig::default()
        .with_self_test_ms(0)
        .with_entry_settle_ms(0)
        .with_run_time_max(20);
    let remote = RemoteTrigger::new();
    let mut source = CommandSource::from_config(&config, false, &remote);
    // travel longer than the run time budget allows
    let mut io = SimulatedGate::new(30, 100);
    let mut gate = GateController::new(config);

    for _ in 0..30 {
        cycle(&mut gate, &mut io, &mut source, false);
    }
    assert_eq!(gate.state(), GateState::Fault);
    assert_eq!(gate.previous_state(), GateState::Closing);

    // a press resumes the interrupted motion, which then completes
    for _ in 0..10 {
        cycle(&mut gate, &mut io, &mut source, true);
    }
    assert_eq!(gate.state(), GateState::Closing);
    for _ in 0..20 {
        cycle(&mut gate, &mut io, &mut source, false);
    }
    assert_eq!(gate.state(), GateState::Close);
}
