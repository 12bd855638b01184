#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

use wbgt_core::bus::SensorBus;
use wbgt_core::context::DeviceContext;
use wbgt_core::identity::{DeviceIdentity, read_identity};
use wbgt_core::metrics::HeatStressResult;
use wbgt_core::mode::{CommState, ModeSelector};
use wbgt_core::sensors::SensorAggregator;
use wbgt_core::storage::SettingsStore;
use wbgt_firmware::climate::Bme280Sensor;
use wbgt_firmware::entropy::HardwareRng;
use wbgt_firmware::net::{self, RadioLink};
use wbgt_firmware::{Sensors, Store, config, hardware};

const SAMPLE_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(log::LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    // The radio has to run before the TRNG yields real entropy.
    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio = RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    // I2C: identity EEPROM and climate sensor
    let i2c0 = hardware::create_i2c_bus(peripherals.I2C0, peripherals.GPIO8, peripherals.GPIO9);
    let SensorBus {
        climate: sensor_i2c,
        identity: mut eeprom_i2c,
    } = hardware::share_i2c_bus(i2c0);

    let identity = match read_identity(&mut eeprom_i2c).await {
        Ok(identity) => identity,
        Err(_) => {
            warn!("Using placeholder identity");
            DeviceIdentity::unknown()
        }
    };

    let context = match DeviceContext::initialize(
        identity,
        config::device_config(),
        &mut HardwareRng::new(),
    ) {
        Ok(context) => context,
        Err(e) => panic!("Device context initialization failed: {}", e),
    };

    let mut link = RadioLink::new(
        &spawner,
        wifi_controller,
        interfaces.sta,
        interfaces.ap,
        context.network_seed(),
        context.join_policy().attempt_timeout_ms,
    );

    // Settings and web assets on the SD card
    let sd_storage = hardware::init_sd_card(
        peripherals.SPI2,
        peripherals.GPIO12,
        peripherals.GPIO11,
        peripherals.GPIO13,
        peripherals.GPIO10,
    );
    static STORE: StaticCell<Store> = StaticCell::new();
    let store: &'static Store = STORE.init(SettingsStore::new(
        context.codec(),
        context.storage_files(),
        sd_storage,
        HardwareRng::new(),
    ));

    // Sensors
    let mut climate = Bme280Sensor::new(sensor_i2c);
    if let Err(e) = climate.init().await {
        warn!("Climate sensor unavailable at boot: {}", e);
    }

    #[cfg(feature = "globe-probe")]
    let probe = Some(hardware::init_globe_probe(
        peripherals.SPI3,
        peripherals.GPIO4,
        peripherals.GPIO5,
        peripherals.GPIO6,
        peripherals.GPIO7,
    ));
    #[cfg(not(feature = "globe-probe"))]
    let probe: Option<hardware::GlobeProbe> = None;

    static SENSORS: StaticCell<Sensors> = StaticCell::new();
    let sensors: &'static Sensors = SENSORS.init(SensorAggregator::new(Some(climate), probe));

    // Boot mode
    let mut button = hardware::provisioning_button(peripherals.GPIO0);
    let outcome = ModeSelector::new(&context)
        .run(&mut button, store, &mut link, &mut embassy_time::Delay)
        .await;

    match &outcome.state {
        CommState::Provisioning => {
            net::spawn_http_workers(&spawner, link.access_point_stack(), sensors, store);
        }
        CommState::Connected => {
            net::spawn_http_workers(&spawner, link.station_stack(), sensors, store);
        }
        CommState::Offline(reason) => {
            warn!("No network, telemetry server not started ({:?})", reason);
        }
        other => error!("Boot ended in unexpected state {:?}", other),
    }

    loop {
        match sensors.sample().await {
            Ok(snapshot) => {
                let result = HeatStressResult::from_snapshot(&snapshot);
                info!(
                    "T={:.1}C RH={:.1}% P={:.1}hPa globe={:?} WBGT={:?}",
                    snapshot.dry_temperature_c,
                    snapshot.relative_humidity_pct,
                    snapshot.pressure_hpa,
                    snapshot.globe_temperature_c,
                    result.map(|r| r.wbgt),
                );
            }
            Err(e) => warn!("Sensor sample failed: {}", e),
        }
        Timer::after(SAMPLE_LOG_INTERVAL).await;
    }
}
