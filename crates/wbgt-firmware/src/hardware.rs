//! Hardware bring-up for the wbgt-node board
//!
//! Pin map (ESP32-S3):
//! - I2C0: SDA GPIO8, SCL GPIO9 (BME280 at 0x76, identity EEPROM at 0x50)
//! - SPI2: SD card, SCK GPIO12, MOSI GPIO11, MISO GPIO13, CS GPIO10
//! - SPI3: MAX31865 globe probe, SCK GPIO4, MOSI GPIO5, MISO GPIO6, CS GPIO7
//! - GPIO0: provisioning button, active low
//!
//! GPIO35..37 stay free for the octal PSRAM.

use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::Config as I2cConfig;
use esp_hal::peripherals;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::{Async, Blocking};
use log::info;
use static_cell::StaticCell;
use wbgt_core::bus::{I2cBus, SensorBus, SharedI2c};

use crate::climate::Bme280Sensor;
use crate::sd_medium::{FixedTimeSource, SdCardMedium};

pub type I2c0 = esp_hal::i2c::master::I2c<'static, Async>;
pub type SharedBus = SharedI2c<'static, I2c0>;

pub type ClimateSensor = Bme280Sensor<SharedBus>;

pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, NoDelay>;
pub type SdStorage = SdCardMedium<SdSpi, esp_hal::delay::Delay, FixedTimeSource>;

#[cfg(feature = "globe-probe")]
pub type ProbeSpi = ExclusiveDevice<Spi<'static, Async>, Output<'static>, NoDelay>;
#[cfg(feature = "globe-probe")]
pub type GlobeProbe = wbgt_core::sensors::Max31865<ProbeSpi, embassy_time::Delay>;
#[cfg(not(feature = "globe-probe"))]
pub type GlobeProbe = wbgt_core::sensors::NoProbe;

/// Create the I2C peripheral (400 kHz).
pub fn create_i2c_bus(
    i2c0: peripherals::I2C0<'static>,
    sda: peripherals::GPIO8<'static>,
    scl: peripherals::GPIO9<'static>,
) -> I2c0 {
    esp_hal::i2c::master::I2c::new(
        i2c0,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .unwrap()
    .with_sda(sda)
    .with_scl(scl)
    .into_async()
}

/// Move the I2C peripheral into a static bus and hand out its tenants.
pub fn share_i2c_bus(i2c0: I2c0) -> SensorBus<'static, I2c0> {
    static I2C0_BUS: StaticCell<I2cBus<I2c0>> = StaticCell::new();
    SensorBus::split(I2C0_BUS.init(I2cBus::new(i2c0)))
}

/// SD card on SPI2, clocked at 400 kHz for card initialization.
pub fn init_sd_card(
    spi2: peripherals::SPI2<'static>,
    sck: peripherals::GPIO12<'static>,
    mosi: peripherals::GPIO11<'static>,
    miso: peripherals::GPIO13<'static>,
    cs: peripherals::GPIO10<'static>,
) -> SdStorage {
    let spi_bus = Spi::new(
        spi2,
        SpiConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .unwrap()
    .with_sck(sck)
    .with_mosi(mosi)
    .with_miso(miso);

    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let spi_device = ExclusiveDevice::new_no_delay(spi_bus, cs).unwrap();

    let sd_card = embedded_sdmmc::SdCard::new(spi_device, esp_hal::delay::Delay::new());
    info!("SD card bus ready");
    SdCardMedium::new(sd_card, FixedTimeSource)
}

/// MAX31865 RTD converter on SPI3 (SPI mode 1, 1 MHz).
#[cfg(feature = "globe-probe")]
pub fn init_globe_probe(
    spi3: peripherals::SPI3<'static>,
    sck: peripherals::GPIO4<'static>,
    mosi: peripherals::GPIO5<'static>,
    miso: peripherals::GPIO6<'static>,
    cs: peripherals::GPIO7<'static>,
) -> GlobeProbe {
    let spi_bus = Spi::new(
        spi3,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(1))
            .with_mode(esp_hal::spi::Mode::_1),
    )
    .unwrap()
    .with_sck(sck)
    .with_mosi(mosi)
    .with_miso(miso)
    .into_async();

    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let spi_device = ExclusiveDevice::new_no_delay(spi_bus, cs).unwrap();

    wbgt_core::sensors::Max31865::new(
        spi_device,
        embassy_time::Delay,
        wbgt_core::sensors::max31865::Wiring::TwoWire,
    )
}

/// Provisioning button with the internal pull-up; pressed reads low.
pub fn provisioning_button(pin: peripherals::GPIO0<'static>) -> Input<'static> {
    Input::new(pin, InputConfig::default().with_pull(Pull::Up))
}
