//! MQTT bridge
//!
//! Translates transport events into subscriptions, the connect handshake and
//! remote toggles. The bridge performs no I/O itself: [`MessagingBridge::handle`]
//! returns the actions the transport has to carry out.

use core::fmt;

use heapless::Vec;
use log::{debug, info, warn};

use crate::gpi::RemoteTrigger;

/// Topic the external monitor publishes gate status on
pub const STATUS_TOPIC: &str = "Estado_del_porton";
/// Topic carrying pulse-pulse commands
pub const CONTROL_TOPIC: &str = "Boton_de_control";
/// Largest payload accepted on the control topic
pub const MAX_PAYLOAD_LEN: usize = 100;
/// Most actions a single event produces
pub const MAX_ACTIONS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Topic {
    Status,
    Control,
}

impl Topic {
    pub const fn name(self) -> &'static str {
        match self {
            Topic::Status => STATUS_TOPIC,
            Topic::Control => CONTROL_TOPIC,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            STATUS_TOPIC => Some(Topic::Status),
            CONTROL_TOPIC => Some(Topic::Control),
            _ => None,
        }
    }
}

/// Command carried by a control topic payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlCommand {
    /// `"1"`: pulse-pulse toggle
    Trigger,
    /// `"0"`: idle value, published on connect
    Idle,
}

impl ControlCommand {
    pub const fn as_payload(self) -> &'static [u8] {
        match self {
            ControlCommand::Trigger => b"1",
            ControlCommand::Idle => b"0",
        }
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(PayloadError::TooLong(payload.len()));
        }
        match payload {
            b"1" => Ok(ControlCommand::Trigger),
            b"0" => Ok(ControlCommand::Idle),
            _ => Err(PayloadError::Unrecognized),
        }
    }
}

impl TryFrom<&[u8]> for ControlCommand {
    type Error = PayloadError;

    fn try_from(payload: &[u8]) -> Result<Self, Self::Error> {
        Self::from_payload(payload)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadError {
    TooLong(usize),
    Unrecognized,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::TooLong(len) => {
                write!(f, "payload of {} bytes exceeds {}", len, MAX_PAYLOAD_LEN)
            }
            PayloadError::Unrecognized => f.write_str("unrecognized control payload"),
        }
    }
}

impl core::error::Error for PayloadError {}

/// Events reported by the MQTT transport
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeEvent<'a> {
    Connected,
    Disconnected,
    Subscribed { topic: &'a str },
    Published { topic: &'a str },
    Data { topic: &'a str, payload: &'a [u8] },
    Error,
}

/// Work the transport has to do on behalf of the bridge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeAction {
    Subscribe(Topic),
    Publish { topic: Topic, command: ControlCommand },
}

pub type Actions = Vec<BridgeAction, MAX_ACTIONS>;

/// Outcome of an inbound message, mostly useful for logging and tests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Inbound {
    Triggered,
    Idle,
    Ignored,
    Rejected(PayloadError),
}

/// Ping schedule for an MQTT session, on a monotonic millisecond clock.
///
/// Only packets the client sends count as activity. Inbound messages never
/// push the deadline back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeepAlive {
    interval_ms: u64,
    next_ping_ms: u64,
}

impl KeepAlive {
    pub const fn new(now_ms: u64, interval_ms: u64) -> Self {
        Self {
            interval_ms,
            next_ping_ms: now_ms.saturating_add(interval_ms),
        }
    }

    /// Instant the next ping is owed
    pub const fn deadline_ms(&self) -> u64 {
        self.next_ping_ms
    }

    pub const fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_ping_ms
    }

    /// Record a packet sent to the broker at `now_ms`
    pub fn on_sent(&mut self, now_ms: u64) {
        self.next_ping_ms = now_ms.saturating_add(self.interval_ms);
    }
}

/// Glue between the MQTT transport and the command source
#[derive(Debug)]
pub struct MessagingBridge<'a> {
    remote: &'a RemoteTrigger,
    connected: bool,
}

impl<'a> MessagingBridge<'a> {
    pub fn new(remote: &'a RemoteTrigger) -> Self {
        Self {
            remote,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn handle(&mut self, event: BridgeEvent<'_>) -> Actions {
        let mut actions = Actions::new();
        match event {
            BridgeEvent::Connected => {
                info!("MQTT connected");
                self.connected = true;
                let _ = actions.push(BridgeAction::Subscribe(Topic::Status));
                let _ = actions.push(BridgeAction::Subscribe(Topic::Control));
                let _ = actions.push(BridgeAction::Publish {
                    topic: Topic::Control,
                    command: ControlCommand::Idle,
                });
            }
            BridgeEvent::Disconnected => {
                info!("MQTT disconnected");
                self.connected = false;
            }
            BridgeEvent::Subscribed { topic } => debug!("MQTT subscribed to {}", topic),
            BridgeEvent::Published { topic } => debug!("MQTT published to {}", topic),
            BridgeEvent::Data { topic, payload } => {
                self.on_data(topic, payload);
            }
            BridgeEvent::Error => warn!("MQTT transport error"),
        }
        actions
    }

    /// Decode an inbound message and raise the remote trigger on `"1"`
    pub fn on_data(&mut self, topic: &str, payload: &[u8]) -> Inbound {
        match Topic::from_name(topic) {
            Some(Topic::Control) => {}
            Some(Topic::Status) | None => {
                debug!("MQTT data on {} ignored", topic);
                return Inbound::Ignored;
            }
        }

        match ControlCommand::from_payload(payload) {
            Ok(ControlCommand::Trigger) => {
                self.remote.trigger();
                Inbound::Triggered
            }
            Ok(ControlCommand::Idle) => Inbound::Idle,
            Err(err) => {
                warn!("MQTT control payload rejected: {}", err);
                Inbound::Rejected(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_subscribes_and_publishes_idle() {
        let remote = RemoteTrigger::new();
        let mut bridge = MessagingBridge::new(&remote);
        let actions = bridge.handle(BridgeEvent::Connected);
        assert_eq!(
            actions.as_slice(),
            &[
                BridgeAction::Subscribe(Topic::Status),
                BridgeAction::Subscribe(Topic::Control),
                BridgeAction::Publish {
                    topic: Topic::Control,
                    command: ControlCommand::Idle
                },
            ]
        );
        assert!(bridge.is_connected());
        assert!(!remote.is_pending());
    }

    #[test]
    fn trigger_payload_sets_remote_flag() {
        let remote = RemoteTrigger::new();
        let mut bridge = MessagingBridge::new(&remote);
        let actions = bridge.handle(BridgeEvent::Data {
            topic: CONTROL_TOPIC,
            payload: b"1",
        });
        assert!(actions.is_empty());
        assert!(remote.take());
    }

    #[test]
    fn other_payloads_and_topics_do_not_trigger() {
        let remote = RemoteTrigger::new();
        let mut bridge = MessagingBridge::new(&remote);
        assert_eq!(bridge.on_data(CONTROL_TOPIC, b"0"), Inbound::Idle);
        assert_eq!(bridge.on_data(STATUS_TOPIC, b"1"), Inbound::Ignored);
        assert_eq!(bridge.on_data("/2022-1143/SPP", b"1"), Inbound::Ignored);
        assert_eq!(
            bridge.on_data(CONTROL_TOPIC, b"10"),
            Inbound::Rejected(PayloadError::Unrecognized)
        );
        assert_eq!(
            bridge.on_data(CONTROL_TOPIC, b" 1"),
            Inbound::Rejected(PayloadError::Unrecognized)
        );
        assert!(!remote.is_pending());
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = [b'1'; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            ControlCommand::try_from(&payload[..]),
            Err(PayloadError::TooLong(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn repeated_triggers_coalesce() {
        let remote = RemoteTrigger::new();
        let mut bridge = MessagingBridge::new(&remote);
        bridge.on_data(CONTROL_TOPIC, b"1");
        bridge.on_data(CONTROL_TOPIC, b"1");
        assert!(remote.take());
        assert!(!remote.take());
    }

    #[test]
    fn inbound_traffic_does_not_defer_ping() {
        let remote = RemoteTrigger::new();
        let mut bridge = MessagingBridge::new(&remote);
        let mut keep_alive = KeepAlive::new(1_000, 30_000);
        assert_eq!(keep_alive.deadline_ms(), 31_000);

        // status updates every 20 s leave the deadline where it was
        for now in [21_000, 41_000] {
            assert!(bridge
                .handle(BridgeEvent::Data {
                    topic: STATUS_TOPIC,
                    payload: b"OPEN",
                })
                .is_empty());
            assert_eq!(keep_alive.deadline_ms(), 31_000);
            assert_eq!(keep_alive.is_due(now), now >= 31_000);
        }

        keep_alive.on_sent(41_000);
        assert_eq!(keep_alive.deadline_ms(), 71_000);
        assert!(!keep_alive.is_due(70_999));
        assert!(keep_alive.is_due(71_000));
    }

    #[test]
    fn disconnect_is_tracked() {
        let remote = RemoteTrigger::new();
        let mut bridge = MessagingBridge::new(&remote);
        bridge.handle(BridgeEvent::Connected);
        assert!(bridge.handle(BridgeEvent::Disconnected).is_empty());
        assert!(!bridge.is_connected());
        assert_eq!(Topic::from_name(Topic::Control.name()), Some(Topic::Control));
    }
}
