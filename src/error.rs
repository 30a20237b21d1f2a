use embassy_time::TimeoutError;
use embedded_hal_1::i2c::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Invalid configuration, prevents driver activation.
    Configuration(ConfigError),
    /// The device did not acknowledge the presence probe or identified as something else.
    DeviceNotFound,
    /// A bus transaction was not acknowledged or timed out.
    BusTransaction(BusError),
    /// Raw data could not be turned into a measurement.
    Decode(DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    AddressOutOfRange(u8),
    ZeroTimeout,
    TimeoutTooLong,
    MissingSink,
    TooManyChannels,
    InvalidCalibration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    NoAcknowledge,
    Timeout,
    ArbitrationLoss,
    Overrun,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    Length { expected: usize, actual: usize },
    Crc,
    NotReady,
    SensorFault,
    ZeroFrequency,
}

impl Error {
    /// Errors raised during an update cycle are scoped to one channel and one cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BusTransaction(_) | Error::Decode(_))
    }
}

impl From<ConfigError> for Error {
    fn from(value: ConfigError) -> Self {
        Error::Configuration(value)
    }
}

impl From<BusError> for Error {
    fn from(value: BusError) -> Self {
        Error::BusTransaction(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Error::Decode(value)
    }
}

impl From<ErrorKind> for BusError {
    fn from(value: ErrorKind) -> Self {
        match value {
            ErrorKind::NoAcknowledge(_) => BusError::NoAcknowledge,
            ErrorKind::ArbitrationLoss => BusError::ArbitrationLoss,
            ErrorKind::Overrun => BusError::Overrun,
            _ => BusError::Other,
        }
    }
}

impl From<TimeoutError> for BusError {
    fn from(_: TimeoutError) -> Self {
        BusError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal_1::i2c::NoAcknowledgeSource;

    use super::*;

    #[test]
    fn hal_errors_map_to_bus_errors() {
        assert_eq!(BusError::from(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)), BusError::NoAcknowledge);
        assert_eq!(BusError::from(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)), BusError::NoAcknowledge);
        assert_eq!(BusError::from(ErrorKind::ArbitrationLoss), BusError::ArbitrationLoss);
        assert_eq!(BusError::from(ErrorKind::Bus), BusError::Other);
        assert_eq!(BusError::from(TimeoutError), BusError::Timeout);
    }

    #[test]
    fn only_cycle_errors_are_transient() {
        assert!(Error::from(BusError::Timeout).is_transient());
        assert!(Error::from(DecodeError::Crc).is_transient());
        assert!(!Error::DeviceNotFound.is_transient());
        assert!(!Error::from(ConfigError::MissingSink).is_transient());
    }
}
