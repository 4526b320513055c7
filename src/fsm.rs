//! FSM (Finite State Machine) module
//!
//! Controls the gate opening/closing sequence from limit switch snapshots and
//! pulse-pulse toggles. The machine is stepped once per control cycle by the
//! caller; delays are counted in steps, never slept.

use log::{info, warn};

use crate::types::{
    ControlFlags, FaultCode, GateConfig, GateState, GateStatus, IndicatorOutputs, LimitPosition,
    MotorOutputs, SensorSnapshot, Transition,
};

/// Gate state machine.
///
/// Owns the current and previous state, the control flags and the outputs the
/// I/O layer has to apply on the next refresh.
#[derive(Debug, Clone)]
pub struct GateController {
    config: GateConfig,
    state: GateState,
    previous_state: GateState,
    flags: ControlFlags,
    motors: MotorOutputs,
    indicators: IndicatorOutputs,
    /// Steps spent in the current state, saturating
    ticks_in_state: u32,
}

impl GateController {
    /// Create a controller in INIT with the self-test already running
    pub fn new(config: GateConfig) -> Self {
        let mut controller = Self {
            config,
            state: GateState::Init,
            previous_state: GateState::Init,
            flags: ControlFlags::default(),
            motors: MotorOutputs::STOPPED,
            indicators: IndicatorOutputs::OFF,
            ticks_in_state: 0,
        };
        controller.enter(GateState::Init);
        controller
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn previous_state(&self) -> GateState {
        self.previous_state
    }

    pub fn fault_code(&self) -> FaultCode {
        self.flags.fault_code
    }

    pub fn run_time_counter(&self) -> u32 {
        self.flags.run_time_counter
    }

    /// Motor outputs to apply on the next I/O refresh
    pub fn motors(&self) -> MotorOutputs {
        self.motors
    }

    /// Indicator outputs to apply on the next I/O refresh
    pub fn indicators(&self) -> IndicatorOutputs {
        self.indicators
    }

    pub fn toggle_pending(&self) -> bool {
        self.flags.toggle_requested
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            state: self.state,
            previous_state: self.previous_state,
            fault_code: self.flags.fault_code,
            run_time_counter: self.flags.run_time_counter,
        }
    }

    /// Register a pulse-pulse command.
    ///
    /// A second request before the first is consumed is coalesced.
    pub fn request_toggle(&mut self) {
        self.flags.toggle_requested = true;
    }

    /// Run one control cycle against a fresh sensor snapshot.
    ///
    /// Returns the transition taken, if any. At most one transition happens
    /// per step and the entry action of the new state is applied before
    /// returning, so [`motors`](Self::motors) already reflects it.
    pub fn step(&mut self, sensors: SensorSnapshot) -> Option<Transition> {
        let next = match self.state {
            GateState::Init => self.poll_init(sensors),
            GateState::Open => self.poll_quiescent(GateState::Closing),
            GateState::Close => self.poll_quiescent(GateState::Opening),
            GateState::Opening => self.poll_travel(sensors.limit_switch_open, GateState::Open),
            GateState::Closing => self.poll_travel(sensors.limit_switch_close, GateState::Close),
            GateState::Fault => self.poll_fault(),
        };

        next.map(|to| {
            let from = self.state;
            self.enter(to);
            Transition { from, to }
        })
    }

    fn take_toggle(&mut self) -> bool {
        core::mem::take(&mut self.flags.toggle_requested)
    }

    /// Advance the in-state tick count; true while still inside `hold` ticks
    fn holding(&mut self, hold: u32) -> bool {
        if self.ticks_in_state < hold {
            self.ticks_in_state = self.ticks_in_state.saturating_add(1);
            true
        } else {
            false
        }
    }

    fn poll_init(&mut self, sensors: SensorSnapshot) -> Option<GateState> {
        if self.holding(self.config.self_test_ticks()) {
            return None;
        }
        self.indicators = IndicatorOutputs::OFF;

        match sensors.position() {
            LimitPosition::Closed => Some(GateState::Close),
            LimitPosition::InTransit | LimitPosition::Open => Some(GateState::Closing),
            LimitPosition::Conflict => {
                warn!("Both limit switches engaged during init");
                self.flags.fault_code = FaultCode::LimitSwitchConflict;
                Some(GateState::Fault)
            }
        }
    }

    fn poll_quiescent(&mut self, on_toggle: GateState) -> Option<GateState> {
        self.take_toggle().then_some(on_toggle)
    }

    fn poll_travel(&mut self, limit_reached: bool, done: GateState) -> Option<GateState> {
        if self.holding(self.config.entry_settle_ticks()) {
            return None;
        }
        if limit_reached {
            return Some(done);
        }

        self.flags.run_time_counter = self.flags.run_time_counter.saturating_add(1);
        if self.flags.run_time_counter > self.config.run_time_max {
            warn!(
                "{} exceeded run time after {} polls",
                self.state, self.flags.run_time_counter
            );
            self.flags.fault_code = FaultCode::RunTimeExceeded;
            return Some(GateState::Fault);
        }
        None
    }

    fn poll_fault(&mut self) -> Option<GateState> {
        if !self.take_toggle() {
            return None;
        }
        self.flags.fault_code = FaultCode::None;
        Some(recovery_target(self.previous_state))
    }

    fn enter(&mut self, next: GateState) {
        info!("FSM state {:?} -> {:?}", self.state, next);

        self.previous_state = match next {
            GateState::Init => GateState::Init,
            _ => self.state,
        };
        self.state = next;
        self.ticks_in_state = 0;

        match next {
            GateState::Init => {
                self.motors = MotorOutputs::STOPPED;
                self.flags = ControlFlags::default();
                self.indicators = IndicatorOutputs::ALL_ON;
            }
            GateState::Open | GateState::Close => {
                self.motors = MotorOutputs::STOPPED;
                self.flags.toggle_requested = false;
                self.indicators = IndicatorOutputs::OFF;
            }
            GateState::Opening => {
                self.motors = MotorOutputs::driving_open();
                self.flags.run_time_counter = 0;
                self.indicators = IndicatorOutputs::opening();
            }
            GateState::Closing => {
                self.motors = MotorOutputs::driving_close();
                self.flags.run_time_counter = 0;
                self.indicators = IndicatorOutputs::closing();
            }
            GateState::Fault => {
                self.motors = MotorOutputs::STOPPED;
                self.flags.toggle_requested = false;
                self.indicators = IndicatorOutputs::fault();
            }
        }
    }
}

impl Default for GateController {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

/// State a confirmed fault recovery returns to.
///
/// A run-time fault resumes the motion that failed; anything else, including
/// an INIT limit switch conflict, restarts the self-test.
pub const fn recovery_target(previous: GateState) -> GateState {
    match previous {
        GateState::Opening => GateState::Opening,
        GateState::Closing => GateState::Closing,
        GateState::Init | GateState::Open | GateState::Close | GateState::Fault => GateState::Init,
    }
}
