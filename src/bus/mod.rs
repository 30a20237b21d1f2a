use embassy_time::{with_timeout, Duration};
use embedded_hal_async::i2c::{Error as _, I2c};

use crate::config::DeviceAddress;
use crate::error::BusError;

/// A bus handle bound to one device address. Every transaction is bounded by
/// `timeout`; arbitration between devices sharing the bus is left to `B`.
pub struct BusDevice<B> {
    bus: B,
    address: DeviceAddress,
    timeout: Duration,
}

impl<B: I2c> BusDevice<B> {
    pub fn new(bus: B, address: DeviceAddress, timeout: Duration) -> Self {
        Self { bus, address, timeout }
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let addr = self.address.get();
        match with_timeout(self.timeout, self.bus.write(addr, bytes)).await {
            Ok(result) => result.map_err(|e| e.kind().into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&mut self, buffer: &mut [u8]) -> Result<(), BusError> {
        let addr = self.address.get();
        match with_timeout(self.timeout, self.bus.read(addr, buffer)).await {
            Ok(result) => result.map_err(|e| e.kind().into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_read(&mut self, bytes: &[u8], buffer: &mut [u8]) -> Result<(), BusError> {
        let addr = self.address.get();
        match with_timeout(self.timeout, self.bus.write_read(addr, bytes, buffer)).await {
            Ok(result) => result.map_err(|e| e.kind().into()),
            Err(e) => Err(e.into()),
        }
    }

    /// One byte read; an acknowledged address means something answers there.
    pub async fn probe(&mut self) -> bool {
        let mut buffer = [0u8; 1];

        match self.read(&mut buffer).await {
            Ok(()) => true,
            Err(e) => {
                debug!("bus: no answer at {=u8:#x}: {}", self.address.get(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::mock::{MockBus, Op};

    fn device(bus: &MockBus, address: u8) -> BusDevice<MockBus> {
        BusDevice::new(bus.clone(), DeviceAddress::new(address).unwrap(), Duration::from_millis(50))
    }

    #[test]
    fn probe_reports_presence() {
        let bus = MockBus::new();
        bus.add_device(0x36);

        assert!(block_on(device(&bus, 0x36).probe()));
        assert!(!block_on(device(&bus, 0x37).probe()));
        assert_eq!(bus.transactions(), vec![Op::Read(0x36, 1), Op::Read(0x37, 1)]);
    }

    #[test]
    fn nack_maps_to_bus_error() {
        let bus = MockBus::new();
        bus.add_device(0x2a);
        bus.fail_on(0x2a, &[0x7e]);

        let mut dev = device(&bus, 0x2a);
        let mut buf = [0u8; 2];

        assert_eq!(block_on(dev.write_read(&[0x7e], &mut buf)), Err(BusError::NoAcknowledge));
    }

    #[test]
    fn hanging_bus_times_out() {
        let bus = MockBus::new();
        bus.add_device(0x44);
        bus.hang();

        let started = std::time::Instant::now();
        let result = block_on(device(&bus, 0x44).write(&[0xfd]));

        assert_eq!(result, Err(BusError::Timeout));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
