//! ESP32 board glue
//!
//! Embassy tasks binding the gate core to GPIO pins, the Wi-Fi link and the
//! MQTT broker. Only built with the `firmware` feature.

use embassy_futures::select::{select, Either};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, TcpSocket};
use embassy_net::{Runner, Stack};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Delay, Duration, Instant, Timer};
use esp_hal::gpio::{Input, Output};
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use log::{info, warn};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig as MqttConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use crate::bridge::{BridgeAction, BridgeEvent, KeepAlive, MessagingBridge};
use crate::fsm::GateController;
use crate::gpi::{ButtonPin, CommandSource, RemoteTrigger};
use crate::io::{GateIo, PinGateIo};
use crate::report::{self, StatusLine, StatusReporter};
use crate::types::{GateConfig, GateStatus};

const fn env_or(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(value) => value,
        None => default,
    }
}

pub const WIFI_SSID: &str = env_or(option_env!("GATE_WIFI_SSID"), "Nexxt");
pub const WIFI_PASSWORD: &str = env_or(option_env!("GATE_WIFI_PASSWORD"), "");
pub const MQTT_BROKER_HOST: &str = env_or(option_env!("GATE_MQTT_HOST"), "broker.hivemq.com");
pub const MQTT_BROKER_PORT: u16 = 1883;
pub const MQTT_CLIENT_ID: &str = env_or(option_env!("GATE_MQTT_CLIENT_ID"), "porton-gate");

const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Keep-alive announced to the broker; pings go out at half of it
const KEEP_ALIVE_SECS: u16 = 60;
const PING_INTERVAL: Duration = Duration::from_secs(KEEP_ALIVE_SECS as u64 / 2);
const SOCKET_TIMEOUT: Duration = Duration::from_secs(60);
const SOCKET_BUFFER_LEN: usize = 1024;
const MQTT_BUFFER_LEN: usize = 256;
const MQTT_MAX_PROPERTIES: usize = 5;

/// Remote half of the toggle, raised by the MQTT task
pub static REMOTE_TRIGGER: RemoteTrigger = RemoteTrigger::new();

/// Latest controller status, sampled by the report task
pub static CURRENT_STATUS: Signal<CriticalSectionRawMutex, GateStatus> = Signal::new();

/// Gate control loop. Never returns.
///
/// One iteration is one control cycle: poll the command source, refresh the
/// I/O (which waits the poll period) and step the state machine.
pub async fn run_gate(
    mut io: PinGateIo<Output<'static>, Input<'static>>,
    mut button: ButtonPin<Input<'static>>,
    config: GateConfig,
) -> ! {
    info!("Gate control loop started");

    let mut controller = GateController::new(config);
    let mut source = CommandSource::from_config(&config, button.is_engaged(), &REMOTE_TRIGGER);
    let mut delay = Delay;
    CURRENT_STATUS.signal(controller.status());

    loop {
        if let Some(origin) = source.poll(button.is_engaged()) {
            if origin.includes_remote() {
                if let Some(line) = StatusLine::mandate(controller.state()) {
                    report::emit(&line);
                }
            }
            controller.request_toggle();
        }

        let snapshot = io
            .refresh(
                controller.motors(),
                controller.indicators(),
                &mut delay,
                config.poll_period_ms,
            )
            .await;

        if controller.step(snapshot).is_some() {
            CURRENT_STATUS.signal(controller.status());
        }
    }
}

/// Report task - prints each new controller state
#[embassy_executor::task]
pub async fn report_task() {
    let mut reporter = StatusReporter::new();
    loop {
        let status = CURRENT_STATUS.wait().await;
        reporter.observe(&status);
    }
}

/// Wi-Fi task - keeps the station associated
#[embassy_executor::task]
pub async fn connection_task(mut controller: WifiController<'static>) {
    info!("Wi-Fi task started");

    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("Wi-Fi disconnected, reconnecting");
            Timer::after(RETRY_DELAY).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let client = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(WIFI_SSID.into())
                    .with_password(WIFI_PASSWORD.into()),
            );
            if let Err(err) = controller.set_config(&client) {
                warn!("Wi-Fi config rejected: {:?}", err);
                Timer::after(RETRY_DELAY).await;
                continue;
            }
            if let Err(err) = controller.start_async().await {
                warn!("Wi-Fi start failed: {:?}", err);
                Timer::after(RETRY_DELAY).await;
                continue;
            }
        }

        info!("Connecting to {}", WIFI_SSID);
        match controller.connect_async().await {
            Ok(()) => info!("Wi-Fi connected"),
            Err(err) => {
                warn!("Wi-Fi connect failed: {:?}", err);
                Timer::after(RETRY_DELAY).await;
            }
        }
    }
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[derive(Debug)]
enum SessionError {
    Dns,
    Tcp(ConnectError),
    Mqtt(ReasonCode),
}

/// MQTT task - runs broker sessions through the bridge, reconnecting forever
#[embassy_executor::task]
pub async fn mqtt_task(stack: Stack<'static>) {
    let mut bridge = MessagingBridge::new(&REMOTE_TRIGGER);
    let mut rx_buffer = [0u8; SOCKET_BUFFER_LEN];
    let mut tx_buffer = [0u8; SOCKET_BUFFER_LEN];

    loop {
        stack.wait_config_up().await;

        if let Err(err) = run_session(stack, &mut bridge, &mut rx_buffer, &mut tx_buffer).await {
            warn!("MQTT session ended: {:?}", err);
            bridge.handle(BridgeEvent::Error);
        }
        bridge.handle(BridgeEvent::Disconnected);
        Timer::after(RETRY_DELAY).await;
    }
}

type Client<'a> = MqttClient<'a, TcpSocket<'a>, MQTT_MAX_PROPERTIES, CountingRng>;

async fn run_session(
    stack: Stack<'static>,
    bridge: &mut MessagingBridge<'_>,
    rx_buffer: &mut [u8],
    tx_buffer: &mut [u8],
) -> Result<(), SessionError> {
    let address = stack
        .dns_query(MQTT_BROKER_HOST, DnsQueryType::A)
        .await
        .ok()
        .and_then(|addresses| addresses.first().copied())
        .ok_or(SessionError::Dns)?;

    let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
    socket.set_timeout(Some(SOCKET_TIMEOUT));
    socket
        .connect((address, MQTT_BROKER_PORT))
        .await
        .map_err(SessionError::Tcp)?;

    let mut config = MqttConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
    config.add_max_subscribe_qos(QualityOfService::QoS0);
    config.add_client_id(MQTT_CLIENT_ID);
    config.max_packet_size = MQTT_BUFFER_LEN as u32;
    config.keep_alive = KEEP_ALIVE_SECS;

    let mut write_buffer = [0u8; MQTT_BUFFER_LEN];
    let mut recv_buffer = [0u8; MQTT_BUFFER_LEN];
    let mut client: Client<'_> = MqttClient::new(
        socket,
        &mut write_buffer,
        MQTT_BUFFER_LEN,
        &mut recv_buffer,
        MQTT_BUFFER_LEN,
        config,
    );
    client.connect_to_broker().await.map_err(SessionError::Mqtt)?;
    let mut keep_alive = KeepAlive::new(Instant::now().as_millis(), PING_INTERVAL.as_millis());

    for action in bridge.handle(BridgeEvent::Connected) {
        execute(&mut client, bridge, action).await?;
        keep_alive.on_sent(Instant::now().as_millis());
    }

    loop {
        let deadline = Instant::from_millis(keep_alive.deadline_ms());
        match select(client.receive_message(), Timer::at(deadline)).await {
            Either::First(Ok((topic, payload))) => {
                bridge.handle(BridgeEvent::Data { topic, payload });
            }
            Either::First(Err(code)) => return Err(SessionError::Mqtt(code)),
            Either::Second(()) => {}
        }

        // only sends move the deadline
        if keep_alive.is_due(Instant::now().as_millis()) {
            client.send_ping().await.map_err(SessionError::Mqtt)?;
            keep_alive.on_sent(Instant::now().as_millis());
        }
    }
}

async fn execute(
    client: &mut Client<'_>,
    bridge: &mut MessagingBridge<'_>,
    action: BridgeAction,
) -> Result<(), SessionError> {
    match action {
        BridgeAction::Subscribe(topic) => {
            client
                .subscribe_to_topic(topic.name())
                .await
                .map_err(SessionError::Mqtt)?;
            bridge.handle(BridgeEvent::Subscribed { topic: topic.name() });
        }
        BridgeAction::Publish { topic, command } => {
            client
                .send_message(topic.name(), command.as_payload(), QualityOfService::QoS0, false)
                .await
                .map_err(SessionError::Mqtt)?;
            bridge.handle(BridgeEvent::Published { topic: topic.name() });
        }
    }
    Ok(())
}
