#![no_std]
#![no_main]

use assign_resources::assign_resources;
use defmt::info;
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_rp::i2c::{self, Async, I2c};
use embassy_rp::peripherals::{self, I2C1};
use embassy_rp::bind_interrupts;
use embassy_rp::Peri;
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::Delay;
use polling_sensors::board::{Board, BoardBuilder};
use polling_sensors::capacitive_sensor::{CapacitiveChannel, CapacitiveChannelConfig, CapacitiveSensor, CapacitiveSensorConfig};
use polling_sensors::config::Config;
use polling_sensors::humidity_sensor::{HumidityChannel, HumiditySensor, HumiditySensorConfig};
use polling_sensors::sensor::{Channel as _, PollingDriver};
use polling_sensors::sink::{QueueSink, Reading};
use polling_sensors::soil_sensor::{SoilChannel, SoilSensor, SoilSensorConfig};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    I2C1_IRQ => embassy_rp::i2c::InterruptHandler<I2C1>;
});

assign_resources! {
    sensors: SensorBus {
        pin_18: PIN_18,
        pin_19: PIN_19,
        i2c1: I2C1,
    },
}

type SensorI2c = I2cDevice<'static, NoopRawMutex, I2c<'static, I2C1, Async>>;

type Readings = Channel<CriticalSectionRawMutex, Reading, { Config::READING_QUEUE_DEPTH }>;
type ReadingSink = QueueSink<'static, CriticalSectionRawMutex, { Config::READING_QUEUE_DEPTH }>;

static I2C_BUS: StaticCell<Mutex<NoopRawMutex, I2c<'static, I2C1, Async>>> = StaticCell::new();

static READINGS: Readings = Channel::new();

static SOIL_TEMPERATURE: ReadingSink = QueueSink::new("soil temperature", &READINGS);
static SOIL_MOISTURE: ReadingSink = QueueSink::new("soil moisture", &READINGS);
static CAPACITIVE_LEVEL: ReadingSink = QueueSink::new("capacitive level", &READINGS);
static AIR_TEMPERATURE: ReadingSink = QueueSink::new("air temperature", &READINGS);
static AIR_HUMIDITY: ReadingSink = QueueSink::new("air humidity", &READINGS);

#[embassy_executor::main]
async fn main(s: Spawner) {
    let p = embassy_rp::init(Default::default());
    let r = split_resources! {p};

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Config::I2C_FREQUENCY;
    let i2c_1_bus = I2c::new_async(r.sensors.i2c1, r.sensors.pin_19, r.sensors.pin_18, Irqs, i2c_config);
    let i2c_1_bus_ref: &'static _ = I2C_BUS.init(Mutex::new(i2c_1_bus));

    let soil_config = SoilSensorConfig {
        update_interval: Config::SOIL_UPDATE_INTERVAL,
        temperature: Some(SoilChannel::Temperature.default_config()),
        moisture: Some(SoilChannel::Moisture.default_config()),
        ..Default::default()
    };
    let soil_sensor = SoilSensor::new(I2cDevice::new(i2c_1_bus_ref), Delay, &soil_config)
        .and_then(PollingDriver::new)
        .expect("soil sensor config should be valid")
        .with_sink(SoilChannel::Temperature, &SOIL_TEMPERATURE)
        .with_sink(SoilChannel::Moisture, &SOIL_MOISTURE);

    let capacitive_config = CapacitiveSensorConfig {
        update_interval: Config::CAPACITIVE_UPDATE_INTERVAL,
        channel0: Some(CapacitiveChannelConfig::RAW),
        ..Default::default()
    };
    let capacitive_sensor = CapacitiveSensor::new(I2cDevice::new(i2c_1_bus_ref), Delay, &capacitive_config)
        .and_then(PollingDriver::new)
        .expect("capacitive sensor config should be valid")
        .with_sink(CapacitiveChannel::Channel0, &CAPACITIVE_LEVEL);

    let humidity_config = HumiditySensorConfig {
        update_interval: Config::HUMIDITY_UPDATE_INTERVAL,
        ..Default::default()
    };
    let humidity_sensor = HumiditySensor::new(I2cDevice::new(i2c_1_bus_ref), Delay, &humidity_config)
        .and_then(PollingDriver::new)
        .expect("humidity sensor config should be valid")
        .with_sink(HumidityChannel::Temperature, &AIR_TEMPERATURE)
        .with_sink(HumidityChannel::Humidity, &AIR_HUMIDITY);

    let board = BoardBuilder::new()
        .with_soil_sensor(soil_sensor)
        .with_capacitive_sensor(capacitive_sensor)
        .with_humidity_sensor(humidity_sensor)
        .build();

    s.spawn(reporter()).expect("executor should be initialized");
    s.spawn(orchestrator(board)).expect("executor should be initialized");
}

#[embassy_executor::task]
async fn orchestrator(mut board: Board<'static, SensorI2c, Delay>) {
    // drivers that failed are left out of the schedule, the rest keep running
    let _ = board.setup().await;

    board.run().await
}

#[embassy_executor::task]
async fn reporter() {
    loop {
        let reading = READINGS.receive().await;
        info!("{=str}: {}", reading.label, reading.value);
    }
}
