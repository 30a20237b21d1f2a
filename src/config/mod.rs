use embassy_time::Duration;

use crate::error::ConfigError;
use crate::sensor::Channel;

/// Default time between two automatic update cycles.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Default upper bound for a single bus transaction.
pub const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest accepted bus timeout.
pub const MAX_BUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Firmware wide settings.
pub struct Config;

impl Config {
    pub const I2C_FREQUENCY: u32 = 100_000;
    pub const READING_QUEUE_DEPTH: usize = 8;
    pub const SOIL_UPDATE_INTERVAL: Duration = DEFAULT_UPDATE_INTERVAL;
    pub const CAPACITIVE_UPDATE_INTERVAL: Duration = Duration::from_secs(10);
    pub const HUMIDITY_UPDATE_INTERVAL: Duration = DEFAULT_UPDATE_INTERVAL;
}

/// 7-bit I2C address, restricted to the non-reserved range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub const MIN: u8 = 0x08;
    pub const MAX: u8 = 0x77;

    pub const fn new(address: u8) -> Result<Self, ConfigError> {
        if address >= Self::MIN && address <= Self::MAX {
            Ok(Self(address))
        } else {
            Err(ConfigError::AddressOutOfRange(address))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

/// For compile-time default addresses; an out-of-range value fails const evaluation.
pub(crate) const fn default_address(address: u8) -> DeviceAddress {
    match DeviceAddress::new(address) {
        Ok(address) => address,
        Err(_) => panic!("default address out of range"),
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeasurementUnit {
    /// Degrees Celsius (°C).
    Celsius,
    /// Percent (%).
    Percent,
    /// %RH.
    PercentageRelativeHumidity,
    /// Hertz (Hz).
    Hertz,
    /// Farad (F).
    Farad,
    /// Dimensionless converter counts.
    Counts,
}

impl MeasurementUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            MeasurementUnit::Celsius => "°C",
            MeasurementUnit::Percent => "%",
            MeasurementUnit::PercentageRelativeHumidity => "%RH",
            MeasurementUnit::Hertz => "Hz",
            MeasurementUnit::Farad => "F",
            MeasurementUnit::Counts => "",
        }
    }
}

/// Per-channel metadata. A channel without a config is never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub unit: MeasurementUnit,
    pub accuracy_decimals: u8,
}

impl ChannelConfig {
    pub const fn new(unit: MeasurementUnit, accuracy_decimals: u8) -> Self {
        Self { unit, accuracy_decimals }
    }

    /// Rounds half away from zero to `accuracy_decimals` places.
    pub fn round(&self, value: f32) -> f32 {
        let mut scale = 1.0f32;
        for _ in 0..self.accuracy_decimals {
            scale *= 10.0;
        }
        let scaled = value * scale;
        let sign = if scaled < 0.0 { -1.0 } else { 1.0 };
        let rounded = (scaled + 0.5 * sign) as i64;

        rounded as f32 / scale
    }
}

/// Uniform view over the per-driver configuration structs.
pub trait DriverConfig {
    type Channel: Channel;

    fn address(&self) -> DeviceAddress;

    /// Zero disables automatic polling.
    fn update_interval(&self) -> Duration;

    fn bus_timeout(&self) -> Duration;

    /// `None` leaves the channel disabled.
    fn channel(&self, channel: Self::Channel) -> Option<ChannelConfig>;

    /// Device specific parameter checks.
    fn validate_calibration(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.bus_timeout();
        if timeout.as_ticks() == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if timeout > MAX_BUS_TIMEOUT {
            return Err(ConfigError::TimeoutTooLong);
        }

        self.validate_calibration()
    }
}
