//! Adafruit STEMMA soil sensor: a seesaw co-processor exposing the die
//! temperature and a capacitive touch channel wired to the soil probe.

use core::result::Result;

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::bus::BusDevice;
use crate::config::{default_address, ChannelConfig, DeviceAddress, DriverConfig, MeasurementUnit, DEFAULT_BUS_TIMEOUT, DEFAULT_UPDATE_INTERVAL};
use crate::device::Device;
use crate::error::{ConfigError, DecodeError, Error};
use crate::sensor::Channel;

pub const DEFAULT_ADDRESS: DeviceAddress = default_address(0x36);

const HW_ID_CODE: u8 = 0x55;

const STATUS_BASE: u8 = 0x00;
const STATUS_HW_ID: u8 = 0x01;
const STATUS_VERSION: u8 = 0x02;
const STATUS_OPTIONS: u8 = 0x03;
const STATUS_TEMP: u8 = 0x04;
const STATUS_SWRST: u8 = 0x7f;

const TOUCH_BASE: u8 = 0x0f;
const TOUCH_CHANNEL_OFFSET: u8 = 0x10;
const TOUCH_PIN: u8 = 0;
const TOUCH_ATTEMPTS: usize = 4;
const TOUCH_MAX: u16 = 4095;

const RESET_DELAY_MS: u32 = 500;
const REGISTER_DELAY_US: u32 = 125;
const TOUCH_DELAY_US: u32 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SoilChannel {
    Temperature,
    Moisture,
}

impl Channel for SoilChannel {
    const ALL: &'static [Self] = &[SoilChannel::Temperature, SoilChannel::Moisture];

    fn name(self) -> &'static str {
        match self {
            SoilChannel::Temperature => "temperature",
            SoilChannel::Moisture => "moisture",
        }
    }

    fn default_config(self) -> ChannelConfig {
        match self {
            SoilChannel::Temperature => ChannelConfig::new(MeasurementUnit::Celsius, 1),
            SoilChannel::Moisture => ChannelConfig::new(MeasurementUnit::Percent, 0),
        }
    }
}

/// Touch counts of the probe in dry air and in saturated soil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MoistureCalibration {
    pub dry: u16,
    pub wet: u16,
}

impl MoistureCalibration {
    pub const DEFAULT: Self = Self { dry: 200, wet: 2000 };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wet > self.dry {
            Ok(())
        } else {
            Err(ConfigError::InvalidCalibration)
        }
    }

    /// Linear map of `counts` onto 0..=100 %.
    pub fn percent(&self, counts: u16) -> f32 {
        let span = f32::from(self.wet) - f32::from(self.dry);
        let offset = f32::from(counts) - f32::from(self.dry);

        (offset / span * 100.0).clamp(0.0, 100.0)
    }
}

impl Default for MoistureCalibration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilSensorConfig {
    pub address: DeviceAddress,
    pub update_interval: Duration,
    pub bus_timeout: Duration,
    pub temperature: Option<ChannelConfig>,
    pub moisture: Option<ChannelConfig>,
    /// Without a calibration the raw touch count is published.
    pub moisture_calibration: Option<MoistureCalibration>,
}

impl Default for SoilSensorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            bus_timeout: DEFAULT_BUS_TIMEOUT,
            temperature: None,
            moisture: None,
            moisture_calibration: Some(MoistureCalibration::DEFAULT),
        }
    }
}

impl SoilSensorConfig {
    /// Percent with a calibration, raw touch counts without one.
    pub fn moisture_unit(&self) -> MeasurementUnit {
        match self.moisture_calibration {
            Some(_) => MeasurementUnit::Percent,
            None => MeasurementUnit::Counts,
        }
    }
}

impl DriverConfig for SoilSensorConfig {
    type Channel = SoilChannel;

    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn update_interval(&self) -> Duration {
        self.update_interval
    }

    fn bus_timeout(&self) -> Duration {
        self.bus_timeout
    }

    fn channel(&self, channel: SoilChannel) -> Option<ChannelConfig> {
        match channel {
            SoilChannel::Temperature => self.temperature,
            SoilChannel::Moisture => self.moisture.map(|moisture| ChannelConfig {
                unit: self.moisture_unit(),
                ..moisture
            }),
        }
    }

    fn validate_calibration(&self) -> Result<(), ConfigError> {
        match self.moisture_calibration {
            Some(calibration) => calibration.validate(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Info {
    pub hw_id: u8,
    pub options: u32,
    pub product_code: u16,
    pub year: u8,
    pub month: u8,
    pub day: u8,
}

impl Info {
    fn new(hw_id: u8, options: u32, version: u32) -> Self {
        Self {
            hw_id,
            options,
            product_code: (version >> 16) as u16,
            year: (version & 0x7f) as u8,
            month: ((version >> 7) & 0xf) as u8,
            day: ((version >> 11) & 0x1f) as u8,
        }
    }
}

/// Die temperature, signed 16.16 fixed point in °C.
pub fn decode_temperature(raw: &[u8]) -> Result<f32, DecodeError> {
    let bytes: [u8; 4] = raw.try_into().map_err(|_| DecodeError::Length { expected: 4, actual: raw.len() })?;
    let temperature = i32::from_be_bytes(bytes);

    Ok(temperature as f32 / 65536.0)
}

/// Touch counts; anything above the 12-bit range means the conversion is not done.
pub fn decode_touch(raw: &[u8]) -> Result<u16, DecodeError> {
    let bytes: [u8; 2] = raw.try_into().map_err(|_| DecodeError::Length { expected: 2, actual: raw.len() })?;
    let counts = u16::from_be_bytes(bytes);

    if counts > TOUCH_MAX {
        Err(DecodeError::NotReady)
    } else {
        Ok(counts)
    }
}

pub fn decode_moisture(raw: &[u8], calibration: Option<&MoistureCalibration>) -> Result<f32, DecodeError> {
    let counts = decode_touch(raw)?;

    Ok(match calibration {
        Some(calibration) => calibration.percent(counts),
        None => f32::from(counts),
    })
}

pub struct SoilSensor<B, D> {
    bus: BusDevice<B>,
    delay: D,
    config: SoilSensorConfig,
}

impl<B: I2c, D: DelayNs> Device for SoilSensor<B, D> {
    type Channel = SoilChannel;
    type Config = SoilSensorConfig;
    type Info = Info;

    const NAME: &'static str = "soil sensor";

    fn config(&self) -> &SoilSensorConfig {
        &self.config
    }

    async fn probe(&mut self) -> bool {
        self.bus.probe().await
    }

    async fn init(&mut self) -> Result<Info, Error> {
        debug!("soil sensor: software reset");
        self.write(STATUS_BASE, STATUS_SWRST, &[0xff]).await?;
        self.delay.delay_ms(RESET_DELAY_MS).await;

        let hw_id = self.read_u8(STATUS_BASE, STATUS_HW_ID).await?;
        if hw_id != HW_ID_CODE {
            error!("soil sensor: unexpected hardware id {=u8:#x}, expected {=u8:#x}", hw_id, HW_ID_CODE);
            return Err(Error::DeviceNotFound);
        }

        let options = self.read_u32(STATUS_BASE, STATUS_OPTIONS).await?;
        let version = self.read_u32(STATUS_BASE, STATUS_VERSION).await?;
        let info = Info::new(hw_id, options, version);

        info!(
            "soil sensor:
            hardware id: {=u8:#x}
            options: {=u32:#x}
            product code: {=u16}
            manufacturing date: {=u8}/{=u8}/{=u8}",
            info.hw_id,
            info.options,
            info.product_code,
            info.day,
            info.month,
            info.year
        );

        Ok(info)
    }

    async fn read_channel(&mut self, channel: SoilChannel) -> Result<f32, Error> {
        match channel {
            SoilChannel::Temperature => self.get_temperature().await,
            SoilChannel::Moisture => self.get_moisture().await,
        }
    }
}

impl<B: I2c, D: DelayNs> SoilSensor<B, D> {
    pub fn new(i2c_bus: B, delay: D, config: &SoilSensorConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            bus: BusDevice::new(i2c_bus, config.address(), config.bus_timeout()),
            delay,
            config: *config,
        })
    }

    async fn get_temperature(&mut self) -> Result<f32, Error> {
        let mut buffer = [0u8; 4];

        self.read(STATUS_BASE, STATUS_TEMP, &mut buffer, REGISTER_DELAY_US).await?;
        trace!("soil sensor: temperature raw {=[u8]:#x}", &buffer[..]);

        Ok(decode_temperature(&buffer)?)
    }

    async fn get_moisture(&mut self) -> Result<f32, Error> {
        let mut buffer = [0u8; 2];

        for attempt in 1..=TOUCH_ATTEMPTS {
            self.delay.delay_ms(1).await;
            self.read(TOUCH_BASE, TOUCH_CHANNEL_OFFSET + TOUCH_PIN, &mut buffer, TOUCH_DELAY_US).await?;

            match decode_moisture(&buffer, self.config.moisture_calibration.as_ref()) {
                Err(DecodeError::NotReady) => {
                    debug!("soil sensor: touch not ready, attempt {=usize}", attempt);
                }
                outcome => return Ok(outcome?),
            }
        }

        warn!("soil sensor: touch conversion not ready after {=usize} attempts", TOUCH_ATTEMPTS);
        Err(DecodeError::NotReady.into())
    }

    async fn read_u8(&mut self, base_reg: u8, fn_reg: u8) -> Result<u8, Error> {
        let mut buffer = [0u8; 1];
        self.read(base_reg, fn_reg, &mut buffer, REGISTER_DELAY_US).await?;

        Ok(buffer[0])
    }

    async fn read_u32(&mut self, base_reg: u8, fn_reg: u8) -> Result<u32, Error> {
        let mut buffer = [0u8; 4];
        self.read(base_reg, fn_reg, &mut buffer, REGISTER_DELAY_US).await?;

        Ok(u32::from_be_bytes(buffer))
    }

    /// Register reads are two transactions: select, wait for the seesaw, read.
    async fn read(&mut self, base_reg: u8, fn_reg: u8, buffer: &mut [u8], delay_us: u32) -> Result<(), Error> {
        self.bus.write(&[base_reg, fn_reg]).await?;
        self.delay.delay_us(delay_us).await;
        self.bus.read(buffer).await?;

        Ok(())
    }

    async fn write(&mut self, base_reg: u8, fn_reg: u8, data: &[u8]) -> Result<(), Error> {
        let mut frame = [0u8; 6];
        let len = 2 + data.len().min(frame.len() - 2);
        frame[0] = base_reg;
        frame[1] = fn_reg;
        frame[2..len].copy_from_slice(&data[..len - 2]);

        self.bus.write(&frame[..len]).await?;

        Ok(())
    }
}
