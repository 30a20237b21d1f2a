//! TI FDC2x1x capacitance-to-digital converter. Each channel drives an LC
//! tank; the converter reports the tank frequency as a 28-bit ratio against
//! the reference clock.

use core::f32::consts::PI;

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::bus::BusDevice;
use crate::config::{default_address, ChannelConfig, DeviceAddress, DriverConfig, MeasurementUnit, DEFAULT_BUS_TIMEOUT, DEFAULT_UPDATE_INTERVAL};
use crate::device::Device;
use crate::error::{ConfigError, DecodeError, Error};
use crate::sensor::Channel;

pub const DEFAULT_ADDRESS: DeviceAddress = default_address(0x2a);

/// "TI" in ASCII.
const MANUFACTURER_ID: u16 = 0x5449;

const REG_DATA_MSB_CH0: u8 = 0x00;
const REG_DATA_LSB_CH0: u8 = 0x01;
const REG_RCOUNT_CH0: u8 = 0x08;
const REG_SETTLECOUNT_CH0: u8 = 0x10;
const REG_CLOCK_DIVIDERS_CH0: u8 = 0x14;
const REG_STATUS: u8 = 0x18;
const REG_ERROR_CONFIG: u8 = 0x19;
const REG_CONFIG: u8 = 0x1a;
const REG_MUX_CONFIG: u8 = 0x1b;
const REG_RESET_DEV: u8 = 0x1c;
const REG_DRIVE_CH0: u8 = 0x1e;
const REG_MANUFACTURER_ID: u8 = 0x7e;
const REG_DEVICE_ID: u8 = 0x7f;

const RESET: u16 = 0x8000;
const RCOUNT: u16 = 0x8329;
const SETTLECOUNT: u16 = 0x0020;
const CLOCK_DIVIDER: u16 = 0x1001;
const DRIVE_CURRENT: u16 = 0x8000;
const ERROR_CONFIG: u16 = 0x3800;
const CONFIG: u16 = 0x1481;
const MUX_CONFIG: u16 = 0x020d;
const MUX_AUTOSCAN: u16 = 0x8000;

const DATA_WATCHDOG_TIMEOUT: u16 = 1 << 13;
const DATA_AMPLITUDE_WARNING: u16 = 1 << 12;
const DATA_MSB_MASK: u16 = 0x0fff;

const STATUS_ERR_WATCHDOG: u16 = 1 << 11;
const STATUS_ERR_AMPLITUDE_HIGH: u16 = 1 << 10;
const STATUS_ERR_AMPLITUDE_LOW: u16 = 1 << 9;
const STATUS_DATA_READY: u16 = 1 << 6;

const POWER_UP_DELAY_MS: u32 = 100;
const RESET_DELAY_MS: u32 = 10;

/// Full scale of the 28-bit conversion result.
const FULL_SCALE: f32 = 268_435_456.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapacitiveChannel {
    Channel0,
    Channel1,
    Channel2,
    Channel3,
}

impl CapacitiveChannel {
    pub fn index(self) -> u8 {
        match self {
            CapacitiveChannel::Channel0 => 0,
            CapacitiveChannel::Channel1 => 1,
            CapacitiveChannel::Channel2 => 2,
            CapacitiveChannel::Channel3 => 3,
        }
    }
}

impl Channel for CapacitiveChannel {
    const ALL: &'static [Self] = &[
        CapacitiveChannel::Channel0,
        CapacitiveChannel::Channel1,
        CapacitiveChannel::Channel2,
        CapacitiveChannel::Channel3,
    ];

    fn name(self) -> &'static str {
        match self {
            CapacitiveChannel::Channel0 => "channel0",
            CapacitiveChannel::Channel1 => "channel1",
            CapacitiveChannel::Channel2 => "channel2",
            CapacitiveChannel::Channel3 => "channel3",
        }
    }

    fn default_config(self) -> ChannelConfig {
        ChannelConfig::new(MeasurementUnit::Counts, 0)
    }
}

/// What a channel publishes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapacitanceConversion {
    /// The 28-bit conversion result.
    Raw,
    /// Tank frequency in Hz for the given reference clock.
    Frequency { reference_hz: f32 },
    /// Sensor capacitance in F: C = 1 / (L (2 pi f)^2) - Cp.
    Capacitance { reference_hz: f32, inductance_h: f32, parasitic_f: f32 },
}

impl CapacitanceConversion {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = match *self {
            CapacitanceConversion::Raw => true,
            CapacitanceConversion::Frequency { reference_hz } => reference_hz > 0.0,
            CapacitanceConversion::Capacitance {
                reference_hz,
                inductance_h,
                parasitic_f,
            } => reference_hz > 0.0 && inductance_h > 0.0 && parasitic_f >= 0.0,
        };

        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidCalibration)
        }
    }

    pub fn unit(&self) -> MeasurementUnit {
        match self {
            CapacitanceConversion::Raw => MeasurementUnit::Counts,
            CapacitanceConversion::Frequency { .. } => MeasurementUnit::Hertz,
            CapacitanceConversion::Capacitance { .. } => MeasurementUnit::Farad,
        }
    }

    pub fn apply(&self, counts: u32) -> Result<f32, DecodeError> {
        match *self {
            CapacitanceConversion::Raw => Ok(counts as f32),
            CapacitanceConversion::Frequency { reference_hz } => Ok(frequency(counts, reference_hz)),
            CapacitanceConversion::Capacitance {
                reference_hz,
                inductance_h,
                parasitic_f,
            } => {
                let f = frequency(counts, reference_hz);
                if f <= 0.0 {
                    return Err(DecodeError::ZeroFrequency);
                }
                let omega = 2.0 * PI * f;

                Ok(1.0 / (inductance_h * omega * omega) - parasitic_f)
            }
        }
    }
}

fn frequency(counts: u32, reference_hz: f32) -> f32 {
    counts as f32 * reference_hz / FULL_SCALE
}

/// Settings of one enabled channel. The published unit follows the conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapacitiveChannelConfig {
    pub conversion: CapacitanceConversion,
    pub accuracy_decimals: u8,
}

impl CapacitiveChannelConfig {
    pub const RAW: Self = Self {
        conversion: CapacitanceConversion::Raw,
        accuracy_decimals: 0,
    };

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.conversion.unit(), self.accuracy_decimals)
    }
}

impl Default for CapacitiveChannelConfig {
    fn default() -> Self {
        Self::RAW
    }
}

/// Latched flags of the STATUS register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// Channel that raised the latched error.
    pub error_channel: u8,
    pub watchdog_timeout: bool,
    pub amplitude_high: bool,
    pub amplitude_low: bool,
    pub data_ready: bool,
    /// Unread conversion per channel, indexed by channel number.
    pub unread: [bool; 4],
}

impl Status {
    pub fn from_register(status: u16) -> Self {
        Self {
            error_channel: (status >> 14) as u8,
            watchdog_timeout: status & STATUS_ERR_WATCHDOG != 0,
            amplitude_high: status & STATUS_ERR_AMPLITUDE_HIGH != 0,
            amplitude_low: status & STATUS_ERR_AMPLITUDE_LOW != 0,
            data_ready: status & STATUS_DATA_READY != 0,
            unread: [0, 1, 2, 3].map(|i| status & (1 << (3 - i)) != 0),
        }
    }

    pub fn has_error(&self) -> bool {
        self.watchdog_timeout || self.amplitude_high || self.amplitude_low
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacitiveSensorConfig {
    pub address: DeviceAddress,
    pub update_interval: Duration,
    pub bus_timeout: Duration,
    pub channel0: Option<CapacitiveChannelConfig>,
    pub channel1: Option<CapacitiveChannelConfig>,
    pub channel2: Option<CapacitiveChannelConfig>,
    pub channel3: Option<CapacitiveChannelConfig>,
}

impl CapacitiveSensorConfig {
    pub fn settings(&self, channel: CapacitiveChannel) -> Option<&CapacitiveChannelConfig> {
        match channel {
            CapacitiveChannel::Channel0 => self.channel0.as_ref(),
            CapacitiveChannel::Channel1 => self.channel1.as_ref(),
            CapacitiveChannel::Channel2 => self.channel2.as_ref(),
            CapacitiveChannel::Channel3 => self.channel3.as_ref(),
        }
    }

    /// Indexed by channel number.
    pub fn enabled(&self) -> [bool; 4] {
        let mut enabled = [false; 4];
        for &channel in CapacitiveChannel::ALL {
            enabled[channel.index() as usize] = self.settings(channel).is_some();
        }

        enabled
    }
}

impl Default for CapacitiveSensorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            bus_timeout: DEFAULT_BUS_TIMEOUT,
            channel0: None,
            channel1: None,
            channel2: None,
            channel3: None,
        }
    }
}

impl DriverConfig for CapacitiveSensorConfig {
    type Channel = CapacitiveChannel;

    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn update_interval(&self) -> Duration {
        self.update_interval
    }

    fn bus_timeout(&self) -> Duration {
        self.bus_timeout
    }

    fn channel(&self, channel: CapacitiveChannel) -> Option<ChannelConfig> {
        self.settings(channel).map(CapacitiveChannelConfig::channel_config)
    }

    fn validate_calibration(&self) -> Result<(), ConfigError> {
        CapacitiveChannel::ALL
            .iter()
            .filter_map(|&channel| self.settings(channel))
            .try_for_each(|settings| settings.conversion.validate())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Info {
    pub manufacturer_id: u16,
    pub device_id: u16,
}

/// One conversion result as spread over a channel's MSB and LSB registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub counts: u32,
    pub watchdog_timeout: bool,
    pub amplitude_warning: bool,
}

impl Sample {
    pub fn from_registers(msb: u16, lsb: u16) -> Self {
        Self {
            counts: (u32::from(msb & DATA_MSB_MASK) << 16) | u32::from(lsb),
            watchdog_timeout: msb & DATA_WATCHDOG_TIMEOUT != 0,
            amplitude_warning: msb & DATA_AMPLITUDE_WARNING != 0,
        }
    }

    /// `raw` is the MSB register followed by the LSB register, both big-endian.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; 4] = raw.try_into().map_err(|_| DecodeError::Length { expected: 4, actual: raw.len() })?;

        Ok(Self::from_registers(u16::from_be_bytes([bytes[0], bytes[1]]), u16::from_be_bytes([bytes[2], bytes[3]])))
    }
}

/// Decodes a channel's registers; a watchdog timeout means the tank did not oscillate.
pub fn decode_channel(raw: &[u8], conversion: &CapacitanceConversion) -> Result<f32, DecodeError> {
    let sample = Sample::from_bytes(raw)?;

    if sample.watchdog_timeout {
        return Err(DecodeError::SensorFault);
    }

    conversion.apply(sample.counts)
}

pub struct CapacitiveSensor<B, D> {
    bus: BusDevice<B>,
    delay: D,
    config: CapacitiveSensorConfig,
    status_pending: bool,
}

impl<B: I2c, D: DelayNs> Device for CapacitiveSensor<B, D> {
    type Channel = CapacitiveChannel;
    type Config = CapacitiveSensorConfig;
    type Info = Info;

    const NAME: &'static str = "capacitive sensor";

    fn config(&self) -> &CapacitiveSensorConfig {
        &self.config
    }

    async fn probe(&mut self) -> bool {
        self.bus.probe().await
    }

    async fn init(&mut self) -> Result<Info, Error> {
        self.delay.delay_ms(POWER_UP_DELAY_MS).await;

        let manufacturer_id = self.read_register(REG_MANUFACTURER_ID).await?;
        if manufacturer_id != MANUFACTURER_ID {
            error!(
                "capacitive sensor: unexpected manufacturer id {=u16:#x}, expected {=u16:#x}",
                manufacturer_id, MANUFACTURER_ID
            );
            return Err(Error::DeviceNotFound);
        }
        let device_id = self.read_register(REG_DEVICE_ID).await?;
        info!("capacitive sensor: manufacturer id {=u16:#x}, device id {=u16:#x}", manufacturer_id, device_id);

        self.write_register(REG_RESET_DEV, RESET).await?;
        self.delay.delay_ms(RESET_DELAY_MS).await;

        let enabled = self.config.enabled();
        for channel in CapacitiveChannel::ALL.iter().filter(|c| enabled[c.index() as usize]) {
            let i = channel.index();
            debug!("capacitive sensor: configuring {=str}", channel.name());
            self.write_register(REG_CLOCK_DIVIDERS_CH0 + i, CLOCK_DIVIDER).await?;
            self.write_register(REG_DRIVE_CH0 + i, DRIVE_CURRENT).await?;
            self.write_register(REG_SETTLECOUNT_CH0 + i, SETTLECOUNT).await?;
            self.write_register(REG_RCOUNT_CH0 + i, RCOUNT).await?;
        }

        let (mux_config, config) = mux_and_config(&enabled);
        self.write_register(REG_MUX_CONFIG, mux_config).await?;
        self.write_register(REG_ERROR_CONFIG, ERROR_CONFIG).await?;
        // CONFIG last, it takes the converter out of sleep
        self.write_register(REG_CONFIG, config).await?;

        Ok(Info { manufacturer_id, device_id })
    }

    fn begin_cycle(&mut self) {
        self.status_pending = true;
    }

    async fn read_channel(&mut self, channel: CapacitiveChannel) -> Result<f32, Error> {
        let i = channel.index();
        let conversion = self.config.settings(channel).map_or(CapacitanceConversion::Raw, |s| s.conversion);

        // once per cycle, reading STATUS also clears the latched error flags
        if core::mem::take(&mut self.status_pending) {
            let status = Status::from_register(self.read_register(REG_STATUS).await?);
            self.report_status(&status);
        }

        let msb = self.read_register(REG_DATA_MSB_CH0 + 2 * i).await?;
        let lsb = self.read_register(REG_DATA_LSB_CH0 + 2 * i).await?;

        let mut raw = [0u8; 4];
        raw[..2].copy_from_slice(&msb.to_be_bytes());
        raw[2..].copy_from_slice(&lsb.to_be_bytes());

        let sample = Sample::from_bytes(&raw)?;
        debug!("capacitive sensor: {=str} counts {=u32}", channel.name(), sample.counts);
        if sample.amplitude_warning {
            warn!("capacitive sensor: {=str} amplitude out of range", channel.name());
        }

        Ok(decode_channel(&raw, &conversion)?)
    }
}

/// Single channel runs continuously on the lowest enabled channel, several
/// enable auto-scan from channel 0 up to the highest enabled one.
fn mux_and_config(enabled: &[bool; 4]) -> (u16, u16) {
    let count = enabled.iter().filter(|e| **e).count();
    let lowest = enabled.iter().position(|e| *e).unwrap_or(0) as u16;
    let highest = enabled.iter().rposition(|e| *e).unwrap_or(0) as u16;
    let config = CONFIG | (lowest << 14);

    if count > 1 {
        let sequence = highest.saturating_sub(1);
        (MUX_AUTOSCAN | (sequence << 13) | MUX_CONFIG, config)
    } else {
        (MUX_CONFIG, config)
    }
}

impl<B: I2c, D: DelayNs> CapacitiveSensor<B, D> {
    pub fn new(i2c_bus: B, delay: D, config: &CapacitiveSensorConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            bus: BusDevice::new(i2c_bus, config.address(), config.bus_timeout()),
            delay,
            config: *config,
            status_pending: false,
        })
    }

    fn report_status(&self, status: &Status) {
        if status.has_error() {
            warn!(
                "capacitive sensor: channel{=u8} latched watchdog {=bool}, amplitude high {=bool}, low {=bool}",
                status.error_channel,
                status.watchdog_timeout,
                status.amplitude_high,
                status.amplitude_low
            );
        }

        for &channel in CapacitiveChannel::ALL {
            let i = channel.index() as usize;
            if self.config.settings(channel).is_some() && !status.unread[i] {
                debug!("capacitive sensor: {=str} has no new conversion", channel.name());
            }
        }
        trace!("capacitive sensor: data ready {=bool}", status.data_ready);
    }

    async fn read_register(&mut self, reg: u8) -> Result<u16, Error> {
        let mut buffer = [0u8; 2];
        self.bus.write_read(&[reg], &mut buffer).await?;

        Ok(u16::from_be_bytes(buffer))
    }

    async fn write_register(&mut self, reg: u8, value: u16) -> Result<(), Error> {
        let [msb, lsb] = value.to_be_bytes();
        self.bus.write(&[reg, msb, lsb]).await?;

        Ok(())
    }
}
