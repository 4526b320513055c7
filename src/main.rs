#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_net::StackResources;
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    rng::{Trng, TrngSource},
    timer::timg::TimerGroup,
};
use esp_println::println;
use porton_gate::board::{self, connection_task, mqtt_task, net_task, report_task};
use porton_gate::gpi::ButtonPin;
use porton_gate::io::{GatePins, PinGateIo, INVERT_BUTTON};
use porton_gate::GateConfig;
use rand_core::RngCore;
use static_cell::StaticCell;

esp_bootloader_esp_idf::esp_app_desc!();

/// Button wired to ground with the internal pull-up
const POLARITY: u32 = INVERT_BUTTON;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(size: 72 * 1024);

    // Motor relays and indicator LEDs, all released at boot
    let motor_open = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());
    let motor_close = Output::new(peripherals.GPIO1, Level::Low, OutputConfig::default());
    let led_opening = Output::new(peripherals.GPIO3, Level::Low, OutputConfig::default());
    let led_closing = Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default());
    let led_fault = Output::new(peripherals.GPIO7, Level::Low, OutputConfig::default());

    // Limit switches and the control button
    let limit_open = Input::new(
        peripherals.GPIO18,
        InputConfig::default().with_pull(Pull::Down),
    );
    let limit_close = Input::new(
        peripherals.GPIO19,
        InputConfig::default().with_pull(Pull::Down),
    );
    let button = Input::new(
        peripherals.GPIO15,
        InputConfig::default().with_pull(Pull::Up),
    );

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    #[cfg(target_arch = "riscv32")]
    let software_interrupt =
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);

    esp_rtos::start(
        timg0.timer0,
        #[cfg(target_arch = "riscv32")]
        software_interrupt.software_interrupt0,
    );

    let radio: &'static esp_radio::Controller<'static> = RADIO.init(esp_radio::init().unwrap());
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()).unwrap();

    let _trng_source = TrngSource::new(peripherals.RNG, peripherals.ADC1);
    let mut trng = Trng::try_new().unwrap();
    let seed = trng.next_u64();

    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );

    println!("Polarity mask {}", POLARITY);
    println!("Broker {}:{}", board::MQTT_BROKER_HOST, board::MQTT_BROKER_PORT);

    spawner.spawn(connection_task(wifi_controller)).unwrap();
    spawner.spawn(net_task(runner)).unwrap();
    spawner.spawn(mqtt_task(stack)).unwrap();
    spawner.spawn(report_task()).unwrap();

    let io = PinGateIo::new(
        GatePins {
            motor_open,
            motor_close,
            led_opening,
            led_closing,
            led_fault,
            limit_open,
            limit_close,
        },
        POLARITY,
    );
    let button = ButtonPin::new(button, POLARITY & INVERT_BUTTON != 0);

    // Run the control loop on the main task
    board::run_gate(io, button, GateConfig::default()).await
}
