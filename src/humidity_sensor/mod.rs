//! Sensirion SHT4x temperature and relative humidity sensor.

use core::result::Result;

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::bus::BusDevice;
use crate::config::{default_address, ChannelConfig, DeviceAddress, DriverConfig, MeasurementUnit, DEFAULT_BUS_TIMEOUT, DEFAULT_UPDATE_INTERVAL};
use crate::device::Device;
use crate::error::{ConfigError, DecodeError, Error};
use crate::sensor::Channel;

pub const DEFAULT_ADDRESS: DeviceAddress = default_address(0x44);

const MEASURE_HIGH_PRECISION_COMMAND: u8 = 0xfd;
const SERIAL_NUMBER_COMMAND: u8 = 0x89;
const SOFT_RESET_COMMAND: u8 = 0x94;

const MEASUREMENT_DELAY_MS: u32 = 10;
const COMMAND_DELAY_MS: u32 = 1;

/// Above this temperature the heater must stay off.
const HEATER_MAX_TEMPERATURE: f32 = 65.0;

const CRC_POLYNOMIAL: u8 = 0x31;
const CRC_INIT: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HumidityChannel {
    Temperature,
    Humidity,
}

impl Channel for HumidityChannel {
    const ALL: &'static [Self] = &[HumidityChannel::Temperature, HumidityChannel::Humidity];

    fn name(self) -> &'static str {
        match self {
            HumidityChannel::Temperature => "temperature",
            HumidityChannel::Humidity => "humidity",
        }
    }

    fn default_config(self) -> ChannelConfig {
        match self {
            HumidityChannel::Temperature => ChannelConfig::new(MeasurementUnit::Celsius, 2),
            HumidityChannel::Humidity => ChannelConfig::new(MeasurementUnit::PercentageRelativeHumidity, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaterPower {
    /// 20 mW
    Low,
    /// 110 mW
    Medium,
    /// 200 mW
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaterDuration {
    /// 0.1 s
    Short,
    /// 1 s
    Long,
}

/// Heater pulse applied before re-measuring humidity in condensing conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaterConfig {
    pub power: HeaterPower,
    pub duration: HeaterDuration,
    /// Relative humidity in % above which the heater is pulsed.
    pub humidity_threshold: f32,
}

impl HeaterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (0.0..=100.0).contains(&self.humidity_threshold) {
            Ok(())
        } else {
            Err(ConfigError::InvalidCalibration)
        }
    }

    fn command(&self) -> u8 {
        match (self.power, self.duration) {
            (HeaterPower::High, HeaterDuration::Long) => 0x39,
            (HeaterPower::High, HeaterDuration::Short) => 0x32,
            (HeaterPower::Medium, HeaterDuration::Long) => 0x2f,
            (HeaterPower::Medium, HeaterDuration::Short) => 0x24,
            (HeaterPower::Low, HeaterDuration::Long) => 0x1e,
            (HeaterPower::Low, HeaterDuration::Short) => 0x15,
        }
    }

    /// Pulse length plus the trailing measurement.
    fn delay_ms(&self) -> u32 {
        match self.duration {
            HeaterDuration::Short => 110,
            HeaterDuration::Long => 1100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumiditySensorConfig {
    pub address: DeviceAddress,
    pub update_interval: Duration,
    pub bus_timeout: Duration,
    pub temperature: Option<ChannelConfig>,
    pub humidity: Option<ChannelConfig>,
    pub heater: Option<HeaterConfig>,
}

impl Default for HumiditySensorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            bus_timeout: DEFAULT_BUS_TIMEOUT,
            temperature: Some(HumidityChannel::Temperature.default_config()),
            humidity: Some(HumidityChannel::Humidity.default_config()),
            heater: None,
        }
    }
}

impl DriverConfig for HumiditySensorConfig {
    type Channel = HumidityChannel;

    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn update_interval(&self) -> Duration {
        self.update_interval
    }

    fn bus_timeout(&self) -> Duration {
        self.bus_timeout
    }

    fn channel(&self, channel: HumidityChannel) -> Option<ChannelConfig> {
        match channel {
            HumidityChannel::Temperature => self.temperature,
            HumidityChannel::Humidity => self.humidity,
        }
    }

    fn validate_calibration(&self) -> Result<(), ConfigError> {
        match &self.heater {
            Some(heater) => heater.validate(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Info {
    pub serial_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub temperature: f32,
    pub humidity: f32,
}

/// CRC-8 over one data word, as appended by the sensor after every word.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC_INIT;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ CRC_POLYNOMIAL } else { crc << 1 };
        }
    }

    crc
}

/// Splits `raw` into CRC-checked big-endian words.
fn decode_words<const N: usize>(raw: &[u8]) -> Result<[u16; N], DecodeError> {
    if raw.len() != N * 3 {
        return Err(DecodeError::Length {
            expected: N * 3,
            actual: raw.len(),
        });
    }

    let mut words = [0u16; N];
    for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(3)) {
        if crc8(&chunk[..2]) != chunk[2] {
            return Err(DecodeError::Crc);
        }
        *word = u16::from_be_bytes([chunk[0], chunk[1]]);
    }

    Ok(words)
}

pub fn decode_sample(raw: &[u8]) -> Result<Sample, DecodeError> {
    let [t_ticks, rh_ticks] = decode_words::<2>(raw)?;

    let temperature = -45.0 + 175.0 * t_ticks as f32 / u16::MAX as f32;
    let humidity = (-6.0 + 125.0 * rh_ticks as f32 / u16::MAX as f32).clamp(0.0, 100.0);

    Ok(Sample { temperature, humidity })
}

pub fn decode_serial_number(raw: &[u8]) -> Result<u32, DecodeError> {
    let [high, low] = decode_words::<2>(raw)?;

    Ok((u32::from(high) << 16) | u32::from(low))
}

pub struct HumiditySensor<B, D> {
    bus: BusDevice<B>,
    delay: D,
    config: HumiditySensorConfig,
    sample: Option<Sample>,
}

impl<B: I2c, D: DelayNs> Device for HumiditySensor<B, D> {
    type Channel = HumidityChannel;
    type Config = HumiditySensorConfig;
    type Info = Info;

    const NAME: &'static str = "humidity sensor";

    fn config(&self) -> &HumiditySensorConfig {
        &self.config
    }

    /// The sensor NACKs reads without a pending measurement, a soft reset is
    /// acknowledged in any state.
    async fn probe(&mut self) -> bool {
        match self.bus.write(&[SOFT_RESET_COMMAND]).await {
            Ok(()) => true,
            Err(e) => {
                debug!("humidity sensor: soft reset not acknowledged: {}", e);
                false
            }
        }
    }

    async fn init(&mut self) -> Result<Info, Error> {
        self.delay.delay_ms(COMMAND_DELAY_MS).await;

        let serial_number = self.get_serial_number().await?;
        info!("humidity sensor: serial number {=u32:#x}", serial_number);

        Ok(Info { serial_number })
    }

    /// Both channels are served from one measurement per cycle.
    fn begin_cycle(&mut self) {
        self.sample = None;
    }

    async fn read_channel(&mut self, channel: HumidityChannel) -> Result<f32, Error> {
        let sample = match self.sample {
            Some(sample) => sample,
            None => {
                let sample = self.collect_data().await?;
                self.sample = Some(sample);
                sample
            }
        };

        Ok(match channel {
            HumidityChannel::Temperature => sample.temperature,
            HumidityChannel::Humidity => sample.humidity,
        })
    }
}

impl<B: I2c, D: DelayNs> HumiditySensor<B, D> {
    pub fn new(i2c_bus: B, delay: D, config: &HumiditySensorConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            bus: BusDevice::new(i2c_bus, config.address(), config.bus_timeout()),
            delay,
            config: *config,
            sample: None,
        })
    }

    async fn collect_data(&mut self) -> Result<Sample, Error> {
        let mut sample = self.measure(MEASURE_HIGH_PRECISION_COMMAND, MEASUREMENT_DELAY_MS).await?;

        if let Some(heater) = self.config.heater {
            if sample.humidity > heater.humidity_threshold && sample.temperature < HEATER_MAX_TEMPERATURE {
                info!("humidity sensor: activating heater");
                // the heated temperature is not representative, keep the first one
                sample.humidity = self.measure(heater.command(), heater.delay_ms()).await?.humidity;
            }
        }

        Ok(sample)
    }

    async fn measure(&mut self, command: u8, delay_ms: u32) -> Result<Sample, Error> {
        self.bus.write(&[command]).await?;

        self.delay.delay_ms(delay_ms).await;

        let mut buffer = [0u8; 6];
        self.bus.read(&mut buffer).await?;
        trace!("humidity sensor: raw {=[u8]:#x}", &buffer[..]);

        Ok(decode_sample(&buffer)?)
    }

    async fn get_serial_number(&mut self) -> Result<u32, Error> {
        self.bus.write(&[SERIAL_NUMBER_COMMAND]).await?;

        self.delay.delay_ms(COMMAND_DELAY_MS).await;

        let mut buffer = [0u8; 6];
        self.bus.read(&mut buffer).await?;

        Ok(decode_serial_number(&buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::signal::Signal;

    use super::*;
    use crate::error::BusError;
    use crate::mock::{MockBus, NoopDelay, Op};
    use crate::sensor::PollingDriver;

    const ADDR: u8 = 0x44;

    // 25.0 °C, 56.5 %RH
    const MILD: [u8; 6] = [0x66, 0x66, 0x93, 0x80, 0x00, 0xa2];
    // 25.0 °C, saturated
    const WET: [u8; 6] = [0x66, 0x66, 0x93, 0xff, 0xff, 0xac];
    // 130 °C, saturated
    const HOT_WET: [u8; 6] = [0xff, 0xff, 0xac, 0xff, 0xff, 0xac];

    fn sht4x() -> MockBus {
        let bus = MockBus::new();
        bus.add_device(ADDR);
        bus.respond(ADDR, &[SERIAL_NUMBER_COMMAND], &[0x12, 0x34, 0x37, 0x56, 0x78, 0x7d]);
        bus.respond(ADDR, &[MEASURE_HIGH_PRECISION_COMMAND], &MILD);
        bus
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!((actual - expected).abs() < 0.01, "{actual} != {expected}");
    }

    #[test]
    fn crc_matches_reference_vector() {
        assert_eq!(crc8(&[0xbe, 0xef]), 0x92);
    }

    #[test]
    fn decodes_sample() {
        let sample = decode_sample(&MILD).unwrap();

        assert_close(sample.temperature, 25.0);
        assert_close(sample.humidity, 56.5);
        assert_eq!(decode_sample(&WET).map(|s| s.humidity), Ok(100.0));
    }

    #[test]
    fn rejects_corrupted_words() {
        let mut raw = MILD;
        raw[5] ^= 0x01;

        assert_eq!(decode_sample(&raw), Err(DecodeError::Crc));
        assert_eq!(decode_sample(&raw[..3]), Err(DecodeError::Length { expected: 6, actual: 3 }));
    }

    #[test]
    fn rejects_out_of_range_heater_threshold() {
        let config = HumiditySensorConfig {
            heater: Some(HeaterConfig {
                power: HeaterPower::Low,
                duration: HeaterDuration::Short,
                humidity_threshold: 120.0,
            }),
            ..Default::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::InvalidCalibration));
        assert_eq!(
            HumiditySensor::new(sht4x(), NoopDelay::new(), &config).err(),
            Some(Error::Configuration(ConfigError::InvalidCalibration))
        );
    }

    #[test]
    fn setup_soft_resets_and_reads_serial_number() {
        let bus = sht4x();
        let config = HumiditySensorConfig::default();
        let t = Signal::<NoopRawMutex, f32>::new();
        let rh = Signal::<NoopRawMutex, f32>::new();
        let mut driver = HumiditySensor::new(bus.clone(), NoopDelay::new(), &config)
            .and_then(PollingDriver::new)
            .unwrap()
            .with_sink(HumidityChannel::Temperature, &t)
            .with_sink(HumidityChannel::Humidity, &rh);

        assert_eq!(block_on(driver.setup()), Ok(Info { serial_number: 0x1234_5678 }));
        assert_eq!(bus.writes(ADDR), vec![vec![SOFT_RESET_COMMAND], vec![SERIAL_NUMBER_COMMAND]]);
    }

    #[test]
    fn cycle_measures_once_for_both_channels() {
        let bus = sht4x();
        let config = HumiditySensorConfig::default();
        let t = Signal::<NoopRawMutex, f32>::new();
        let rh = Signal::<NoopRawMutex, f32>::new();
        let mut driver = HumiditySensor::new(bus.clone(), NoopDelay::new(), &config)
            .and_then(PollingDriver::new)
            .unwrap()
            .with_sink(HumidityChannel::Temperature, &t)
            .with_sink(HumidityChannel::Humidity, &rh);
        block_on(driver.setup()).unwrap();

        for _ in 0..2 {
            bus.clear_log();
            let report = block_on(driver.update());

            assert!(report.is_ok());
            assert_eq!(bus.transactions(), vec![Op::Write(ADDR, vec![MEASURE_HIGH_PRECISION_COMMAND]), Op::Read(ADDR, 6)]);
            assert_close(t.try_take().unwrap(), 25.0);
            assert_close(rh.try_take().unwrap(), 56.5);
        }
    }

    #[test]
    fn failed_measurement_is_reported_on_every_channel() {
        let bus = sht4x();
        bus.fail_on(ADDR, &[MEASURE_HIGH_PRECISION_COMMAND]);
        let config = HumiditySensorConfig::default();
        let t = Signal::<NoopRawMutex, f32>::new();
        let rh = Signal::<NoopRawMutex, f32>::new();
        let mut driver = HumiditySensor::new(bus.clone(), NoopDelay::new(), &config)
            .and_then(PollingDriver::new)
            .unwrap()
            .with_sink(HumidityChannel::Temperature, &t)
            .with_sink(HumidityChannel::Humidity, &rh);
        block_on(driver.setup()).unwrap();

        let report = block_on(driver.update());

        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.get(HumidityChannel::Humidity), Some(Err(Error::BusTransaction(BusError::NoAcknowledge))));
        assert_eq!(t.try_take(), None);
        assert_eq!(rh.try_take(), None);

        bus.heal(ADDR, &[MEASURE_HIGH_PRECISION_COMMAND]);
        assert!(block_on(driver.update()).is_ok());
    }

    #[test]
    fn heater_remeasures_humidity_when_wet() {
        let bus = sht4x();
        bus.respond(ADDR, &[MEASURE_HIGH_PRECISION_COMMAND], &WET);
        bus.respond(ADDR, &[0x39], &MILD);
        let delay = NoopDelay::new();
        let config = HumiditySensorConfig {
            temperature: None,
            heater: Some(HeaterConfig {
                power: HeaterPower::High,
                duration: HeaterDuration::Long,
                humidity_threshold: 90.0,
            }),
            ..Default::default()
        };
        let rh = Signal::<NoopRawMutex, f32>::new();
        let mut driver = HumiditySensor::new(bus.clone(), delay.clone(), &config)
            .and_then(PollingDriver::new)
            .unwrap()
            .with_sink(HumidityChannel::Humidity, &rh);
        block_on(driver.setup()).unwrap();
        bus.clear_log();
        let before = delay.requested_ms();

        block_on(driver.update());

        assert_eq!(bus.writes(ADDR), vec![vec![MEASURE_HIGH_PRECISION_COMMAND], vec![0x39]]);
        assert_close(rh.try_take().unwrap(), 56.5);
        assert_eq!(delay.requested_ms() - before, 1110);
    }

    #[test]
    fn heater_stays_off_when_hot() {
        let bus = sht4x();
        bus.respond(ADDR, &[MEASURE_HIGH_PRECISION_COMMAND], &HOT_WET);
        let config = HumiditySensorConfig {
            heater: Some(HeaterConfig {
                power: HeaterPower::Low,
                duration: HeaterDuration::Short,
                humidity_threshold: 50.0,
            }),
            ..Default::default()
        };
        let t = Signal::<NoopRawMutex, f32>::new();
        let rh = Signal::<NoopRawMutex, f32>::new();
        let mut driver = HumiditySensor::new(bus.clone(), NoopDelay::new(), &config)
            .and_then(PollingDriver::new)
            .unwrap()
            .with_sink(HumidityChannel::Temperature, &t)
            .with_sink(HumidityChannel::Humidity, &rh);
        block_on(driver.setup()).unwrap();
        bus.clear_log();

        block_on(driver.update());

        assert_eq!(bus.writes(ADDR), vec![vec![MEASURE_HIGH_PRECISION_COMMAND]]);
        assert_close(t.try_take().unwrap(), 130.0);
        assert_eq!(rh.try_take(), Some(100.0));
    }
}
