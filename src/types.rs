//! Types shared by the gate controller modules.

use core::fmt;

/// Default maximum number of polls a motor may be driven before a fault
pub const RUN_TIME_MAX: u32 = 12_000;
/// Default poll period, which is also the settle delay of each I/O refresh
pub const POLL_PERIOD_MS: u32 = 10;
/// Default hold after entering OPENING/CLOSING, lets the gate leave its limit switch
pub const ENTRY_SETTLE_MS: u32 = 3_000;
/// Default duration of the INIT indicator self-test
pub const SELF_TEST_MS: u32 = 100;
/// Default time the button level must be stable before it is accepted
pub const BUTTON_DEBOUNCE_MS: u32 = 50;

/// Gate controller states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateState {
    Init,
    Open,
    Opening,
    Close,
    Closing,
    Fault,
}

impl GateState {
    pub const ALL: [GateState; 6] = [
        GateState::Init,
        GateState::Open,
        GateState::Opening,
        GateState::Close,
        GateState::Closing,
        GateState::Fault,
    ];

    /// Name printed on the console for this state
    pub const fn label(self) -> &'static str {
        match self {
            GateState::Init => "INIT",
            GateState::Open => "OPEN",
            GateState::Opening => "OPENING",
            GateState::Close => "CLOSE",
            GateState::Closing => "CLOSING",
            GateState::Fault => "ERROR",
        }
    }

    /// OPENING and CLOSING drive a motor and are bounded by the run-time budget
    pub const fn is_travelling(self) -> bool {
        matches!(self, GateState::Opening | GateState::Closing)
    }

    /// OPEN and CLOSE wait for the operator with all motors off
    pub const fn is_quiescent(self) -> bool {
        matches!(self, GateState::Open | GateState::Close)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reason the controller entered [`GateState::Fault`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultCode {
    #[default]
    None,
    /// Both limit switches engaged at the same time
    LimitSwitchConflict,
    /// Motor drive time exceeded the budget before reaching its limit switch
    RunTimeExceeded,
}

/// Sensor levels sampled during one control cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSnapshot {
    pub limit_switch_close: bool,
    pub limit_switch_open: bool,
}

/// Gate position as reported by the two limit switches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LimitPosition {
    Closed,
    Open,
    InTransit,
    /// Both switches engaged, impossible for a correctly wired gate
    Conflict,
}

impl SensorSnapshot {
    pub const fn new(limit_switch_close: bool, limit_switch_open: bool) -> Self {
        Self {
            limit_switch_close,
            limit_switch_open,
        }
    }

    pub const fn position(&self) -> LimitPosition {
        match (self.limit_switch_close, self.limit_switch_open) {
            (true, false) => LimitPosition::Closed,
            (false, true) => LimitPosition::Open,
            (false, false) => LimitPosition::InTransit,
            (true, true) => LimitPosition::Conflict,
        }
    }
}

/// Motor relay outputs.
///
/// Only the stopped and single-direction constructors exist, so the open
/// and close relays can never be energised together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorOutputs {
    open: bool,
    close: bool,
}

impl MotorOutputs {
    pub const STOPPED: MotorOutputs = MotorOutputs {
        open: false,
        close: false,
    };

    pub const fn driving_open() -> Self {
        Self {
            open: true,
            close: false,
        }
    }

    pub const fn driving_close() -> Self {
        Self {
            open: false,
            close: true,
        }
    }

    pub const fn motor_open(&self) -> bool {
        self.open
    }

    pub const fn motor_close(&self) -> bool {
        self.close
    }

    pub const fn is_driving(&self) -> bool {
        self.open || self.close
    }
}

/// Indicator LED outputs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IndicatorOutputs {
    pub led_opening: bool,
    pub led_closing: bool,
    pub led_fault: bool,
}

impl IndicatorOutputs {
    pub const OFF: IndicatorOutputs = IndicatorOutputs {
        led_opening: false,
        led_closing: false,
        led_fault: false,
    };

    pub const ALL_ON: IndicatorOutputs = IndicatorOutputs {
        led_opening: true,
        led_closing: true,
        led_fault: true,
    };

    pub const fn opening() -> Self {
        Self {
            led_opening: true,
            ..Self::OFF
        }
    }

    pub const fn closing() -> Self {
        Self {
            led_closing: true,
            ..Self::OFF
        }
    }

    pub const fn fault() -> Self {
        Self {
            led_fault: true,
            ..Self::OFF
        }
    }
}

/// Mutable control data owned by the state machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlFlags {
    /// Pending pulse-pulse command, consumed once by the state reading it
    pub toggle_requested: bool,
    /// Polls spent driving a motor since entering OPENING/CLOSING
    pub run_time_counter: u32,
    pub fault_code: FaultCode,
}

/// Observable view of the controller, handed to the status reporter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GateStatus {
    pub state: GateState,
    pub previous_state: GateState,
    pub fault_code: FaultCode,
    pub run_time_counter: u32,
}

/// State change produced by a single controller step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub from: GateState,
    pub to: GateState,
}

/// Where a consumed toggle came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToggleOrigin {
    Button,
    Remote,
    /// Button edge and remote trigger in the same poll, still a single toggle
    Both,
}

impl ToggleOrigin {
    pub const fn includes_remote(self) -> bool {
        matches!(self, ToggleOrigin::Remote | ToggleOrigin::Both)
    }
}

/// Gate timing configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GateConfig {
    /// Period of one control cycle and settle delay of each I/O refresh
    pub poll_period_ms: u32,
    /// Hold after entering OPENING/CLOSING before sensors are evaluated
    pub entry_settle_ms: u32,
    /// Duration all indicators stay lit when INIT is entered
    pub self_test_ms: u32,
    /// Polls a motor may be driven before [`FaultCode::RunTimeExceeded`]
    pub run_time_max: u32,
    pub button_debounce_ms: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: POLL_PERIOD_MS,
            entry_settle_ms: ENTRY_SETTLE_MS,
            self_test_ms: SELF_TEST_MS,
            run_time_max: RUN_TIME_MAX,
            button_debounce_ms: BUTTON_DEBOUNCE_MS,
        }
    }
}

impl GateConfig {
    pub const fn with_poll_period_ms(mut self, ms: u32) -> Self {
        self.poll_period_ms = ms;
        self
    }

    pub const fn with_entry_settle_ms(mut self, ms: u32) -> Self {
        self.entry_settle_ms = ms;
        self
    }

    pub const fn with_self_test_ms(mut self, ms: u32) -> Self {
        self.self_test_ms = ms;
        self
    }

    pub const fn with_run_time_max(mut self, polls: u32) -> Self {
        self.run_time_max = polls;
        self
    }

    pub const fn with_button_debounce_ms(mut self, ms: u32) -> Self {
        self.button_debounce_ms = ms;
        self
    }

    /// Convert a duration into whole control cycles, rounding up
    pub const fn ticks(&self, ms: u32) -> u32 {
        if self.poll_period_ms == 0 {
            return 0;
        }
        ms.div_ceil(self.poll_period_ms)
    }

    pub const fn entry_settle_ticks(&self) -> u32 {
        self.ticks(self.entry_settle_ms)
    }

    pub const fn self_test_ticks(&self) -> u32 {
        self.ticks(self.self_test_ms)
    }

    pub const fn button_debounce_ticks(&self) -> u32 {
        self.ticks(self.button_debounce_ms)
    }
}
