//! I/O snapshot for one control cycle.
//!
//! Writes the motor and indicator outputs, waits for the levels to settle and
//! samples the two limit switches.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};
use embedded_hal_async::delay::DelayNs;

use crate::types::{IndicatorOutputs, MotorOutputs, SensorSnapshot};

/// Limit switches read low when engaged
pub const INVERT_LIMIT_SWITCHES: u32 = 1;
/// Motor relays are energised by a low level
pub const INVERT_MOTORS: u32 = 2;
/// Indicator LEDs are lit by a low level
pub const INVERT_INDICATORS: u32 = 4;
/// Control button reads low when pressed
pub const INVERT_BUTTON: u32 = 8;

/// Hardware access for a single control cycle.
///
/// Reads and writes cannot fail; hardware faults are handled outside the
/// state machine.
#[allow(async_fn_in_trait)]
pub trait GateIo {
    fn write(&mut self, motors: MotorOutputs, indicators: IndicatorOutputs);

    fn sample(&mut self) -> SensorSnapshot;

    /// Apply outputs, wait `settle_ms`, then sample the sensors
    async fn refresh<D: DelayNs>(
        &mut self,
        motors: MotorOutputs,
        indicators: IndicatorOutputs,
        delay: &mut D,
        settle_ms: u32,
    ) -> SensorSnapshot {
        self.write(motors, indicators);
        delay.delay_ms(settle_ms).await;
        self.sample()
    }
}

/// Pins wired to the gate
#[derive(Debug)]
pub struct GatePins<O, I> {
    pub motor_open: O,
    pub motor_close: O,
    pub led_opening: O,
    pub led_closing: O,
    pub led_fault: O,
    pub limit_open: I,
    pub limit_close: I,
}

/// [`GateIo`] over plain GPIO pins with a polarity mask
#[derive(Debug)]
pub struct PinGateIo<O, I> {
    pins: GatePins<O, I>,
    polarity: u32,
}

impl<O, I> PinGateIo<O, I>
where
    O: OutputPin + ErrorType<Error = Infallible>,
    I: InputPin + ErrorType<Error = Infallible>,
{
    pub fn new(pins: GatePins<O, I>, polarity: u32) -> Self {
        Self { pins, polarity }
    }
}

fn drive<O>(pin: &mut O, active: bool, inverted: bool)
where
    O: OutputPin + ErrorType<Error = Infallible>,
{
    match pin.set_state(PinState::from(active != inverted)) {
        Ok(()) => {}
        Err(never) => match never {},
    }
}

fn read<I>(pin: &mut I, inverted: bool) -> bool
where
    I: InputPin + ErrorType<Error = Infallible>,
{
    match pin.is_high() {
        Ok(level) => level != inverted,
        Err(never) => match never {},
    }
}

impl<O, I> GateIo for PinGateIo<O, I>
where
    O: OutputPin + ErrorType<Error = Infallible>,
    I: InputPin + ErrorType<Error = Infallible>,
{
    fn write(&mut self, motors: MotorOutputs, indicators: IndicatorOutputs) {
        let motors_inverted = self.polarity & INVERT_MOTORS != 0;
        let leds_inverted = self.polarity & INVERT_INDICATORS != 0;

        // release before energise so the relays never overlap
        if !motors.motor_open() {
            drive(&mut self.pins.motor_open, false, motors_inverted);
        }
        if !motors.motor_close() {
            drive(&mut self.pins.motor_close, false, motors_inverted);
        }
        if motors.motor_open() {
            drive(&mut self.pins.motor_open, true, motors_inverted);
        }
        if motors.motor_close() {
            drive(&mut self.pins.motor_close, true, motors_inverted);
        }

        drive(&mut self.pins.led_opening, indicators.led_opening, leds_inverted);
        drive(&mut self.pins.led_closing, indicators.led_closing, leds_inverted);
        drive(&mut self.pins.led_fault, indicators.led_fault, leds_inverted);
    }

    fn sample(&mut self) -> SensorSnapshot {
        let inverted = self.polarity & INVERT_LIMIT_SWITCHES != 0;
        SensorSnapshot {
            limit_switch_close: read(&mut self.pins.limit_close, inverted),
            limit_switch_open: read(&mut self.pins.limit_open, inverted),
        }
    }
}
