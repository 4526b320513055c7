//! GPI (General Purpose Input) module
//!
//! Turns the physical control button and remote MQTT triggers into a single
//! pulse-pulse toggle for the FSM.

use core::convert::Infallible;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::{ErrorType, InputPin};
use log::{debug, info};

use crate::types::{GateConfig, ToggleOrigin};

/// Remote half of the toggle source.
///
/// Written from the messaging context, consumed by the control loop. Several
/// triggers arriving before the next poll coalesce into one.
#[derive(Debug, Default)]
pub struct RemoteTrigger {
    pending: AtomicBool,
}

impl RemoteTrigger {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    pub fn trigger(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Consume a pending trigger, clearing it
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Debouncer state for a single input, counted in control cycles
#[derive(Debug, Clone)]
struct Debouncer {
    stable_state: bool,
    pending_state: bool,
    /// Polls the pending level has been observed unchanged
    pending_for: u32,
    threshold: u32,
}

impl Debouncer {
    fn new(initial_state: bool, threshold: u32) -> Self {
        Self {
            stable_state: initial_state,
            pending_state: initial_state,
            pending_for: 0,
            threshold,
        }
    }

    /// Update the debouncer with a new raw reading
    /// Returns Some(true) on an accepted rising edge, Some(false) on a falling edge
    fn update(&mut self, raw_state: bool) -> Option<bool> {
        if raw_state != self.pending_state {
            self.pending_state = raw_state;
            self.pending_for = 0;
        }

        if raw_state == self.stable_state {
            return None;
        }

        self.pending_for = self.pending_for.saturating_add(1);
        if self.pending_for >= self.threshold {
            self.stable_state = raw_state;
            Some(raw_state)
        } else {
            None
        }
    }

    fn is_active(&self) -> bool {
        self.stable_state
    }
}

/// Physical button edge detector.
///
/// A press is reported on the debounced rising edge, so it fires once per
/// continuous engaged period and re-arms only after a debounced release.
#[derive(Debug, Clone)]
pub struct ButtonEdge {
    debouncer: Debouncer,
}

impl ButtonEdge {
    /// `initially_engaged` treats a button held at boot as already consumed
    pub fn new(initially_engaged: bool, debounce_ticks: u32) -> Self {
        Self {
            debouncer: Debouncer::new(initially_engaged, debounce_ticks),
        }
    }

    /// Feed one raw sample, true when a new press is recognized
    pub fn sample(&mut self, engaged: bool) -> bool {
        matches!(self.debouncer.update(engaged), Some(true))
    }

    pub fn is_engaged(&self) -> bool {
        self.debouncer.is_active()
    }
}

/// Merges the physical button and the remote trigger into one toggle
#[derive(Debug)]
pub struct CommandSource<'a> {
    button: ButtonEdge,
    remote: &'a RemoteTrigger,
}

impl<'a> CommandSource<'a> {
    pub fn new(button: ButtonEdge, remote: &'a RemoteTrigger) -> Self {
        Self { button, remote }
    }

    pub fn from_config(config: &GateConfig, initially_engaged: bool, remote: &'a RemoteTrigger) -> Self {
        Self::new(
            ButtonEdge::new(initially_engaged, config.button_debounce_ticks()),
            remote,
        )
    }

    /// Poll both sources once.
    ///
    /// The remote flag is consumed on every poll. A button edge and a remote
    /// trigger in the same poll yield one toggle.
    pub fn poll(&mut self, button_engaged: bool) -> Option<ToggleOrigin> {
        let pressed = self.button.sample(button_engaged);
        let remote = self.remote.take();

        let origin = match (pressed, remote) {
            (true, true) => ToggleOrigin::Both,
            (true, false) => ToggleOrigin::Button,
            (false, true) => ToggleOrigin::Remote,
            (false, false) => return None,
        };
        match origin {
            ToggleOrigin::Remote => debug!("GPI: remote trigger"),
            _ => info!("GPI: Control pulse detected"),
        }
        Some(origin)
    }
}

/// Physical control button pin with configurable polarity
#[derive(Debug)]
pub struct ButtonPin<P> {
    pin: P,
    active_low: bool,
}

impl<P> ButtonPin<P>
where
    P: InputPin + ErrorType<Error = Infallible>,
{
    pub fn new(pin: P, active_low: bool) -> Self {
        Self { pin, active_low }
    }

    pub fn is_engaged(&mut self) -> bool {
        let level = match self.pin.is_high() {
            Ok(level) => level,
            Err(never) => match never {},
        };
        level != self.active_low
    }
}
