use embassy_time::{Instant, Timer};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use heapless::Vec;

use crate::{
    capacitive_sensor::CapacitiveSensor, device::Device, error::Error, humidity_sensor::HumiditySensor, sensor::PollingDriver,
    soil_sensor::SoilSensor,
};

/// Drivers that failed to come up, by name.
pub type SetupFailures = Vec<(&'static str, Error), 3>;

/// Hosts the drivers attached to one bus and runs their schedules.
pub struct Board<'a, B: I2c, D: DelayNs> {
    pub soil_sensor: Option<PollingDriver<'a, SoilSensor<B, D>>>,
    pub capacitive_sensor: Option<PollingDriver<'a, CapacitiveSensor<B, D>>>,
    pub humidity_sensor: Option<PollingDriver<'a, HumiditySensor<B, D>>>,
}

pub struct BoardBuilder<'a, B: I2c, D: DelayNs> {
    soil_sensor: Option<PollingDriver<'a, SoilSensor<B, D>>>,
    capacitive_sensor: Option<PollingDriver<'a, CapacitiveSensor<B, D>>>,
    humidity_sensor: Option<PollingDriver<'a, HumiditySensor<B, D>>>,
}

impl<'a, B: I2c, D: DelayNs> Board<'a, B, D> {
    /// Sets up every attached driver. A failing driver stays inactive and
    /// does not keep the others from starting.
    pub async fn setup(&mut self) -> Result<(), SetupFailures> {
        let mut errors = SetupFailures::new();

        info!("Initializing board");

        if let Some(driver) = self.soil_sensor.as_mut() {
            let _ = driver
                .setup()
                .await
                .inspect(|i| info!("Initialized soil sensor {}", i))
                .map_err(|e| errors.push((SoilSensor::<B, D>::NAME, e)));
        }

        if let Some(driver) = self.capacitive_sensor.as_mut() {
            let _ = driver
                .setup()
                .await
                .inspect(|i| info!("Initialized capacitive sensor {}", i))
                .map_err(|e| errors.push((CapacitiveSensor::<B, D>::NAME, e)));
        }

        if let Some(driver) = self.humidity_sensor.as_mut() {
            let _ = driver
                .setup()
                .await
                .inspect(|i| info!("Initialized humidity sensor {}", i))
                .map_err(|e| errors.push((HumiditySensor::<B, D>::NAME, e)));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            error!("Error(s) during board initialization");
            for (name, error) in errors.iter() {
                error!("{=str}: {}", name, error);
            }
            Err(errors)
        }
    }

    pub fn start(&mut self, now: Instant) {
        if let Some(driver) = self.soil_sensor.as_mut() {
            driver.start(now);
        }
        if let Some(driver) = self.capacitive_sensor.as_mut() {
            driver.start(now);
        }
        if let Some(driver) = self.humidity_sensor.as_mut() {
            driver.start(now);
        }
    }

    /// Runs every driver that is due at `now` and returns how many did.
    pub async fn poll(&mut self, now: Instant) -> usize {
        let mut cycles = 0;

        if let Some(driver) = self.soil_sensor.as_mut() {
            cycles += usize::from(driver.poll(now).await.is_some());
        }
        if let Some(driver) = self.capacitive_sensor.as_mut() {
            cycles += usize::from(driver.poll(now).await.is_some());
        }
        if let Some(driver) = self.humidity_sensor.as_mut() {
            cycles += usize::from(driver.poll(now).await.is_some());
        }

        cycles
    }

    /// Earliest deadline over all active drivers.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.soil_sensor.as_ref().and_then(|d| d.next_deadline()),
            self.capacitive_sensor.as_ref().and_then(|d| d.next_deadline()),
            self.humidity_sensor.as_ref().and_then(|d| d.next_deadline()),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub async fn run(&mut self) -> ! {
        self.start(Instant::now());

        loop {
            Timer::at(self.next_deadline().unwrap_or(Instant::MAX)).await;
            self.poll(Instant::now()).await;
        }
    }
}

impl<'a, B: I2c, D: DelayNs> BoardBuilder<'a, B, D> {
    pub fn new() -> Self {
        BoardBuilder {
            soil_sensor: None,
            capacitive_sensor: None,
            humidity_sensor: None,
        }
    }

    pub fn with_soil_sensor(mut self, soil_sensor: PollingDriver<'a, SoilSensor<B, D>>) -> Self {
        self.soil_sensor = Some(soil_sensor);
        self
    }

    pub fn with_capacitive_sensor(mut self, capacitive_sensor: PollingDriver<'a, CapacitiveSensor<B, D>>) -> Self {
        self.capacitive_sensor = Some(capacitive_sensor);
        self
    }

    pub fn with_humidity_sensor(mut self, humidity_sensor: PollingDriver<'a, HumiditySensor<B, D>>) -> Self {
        self.humidity_sensor = Some(humidity_sensor);
        self
    }

    pub fn build(self) -> Board<'a, B, D> {
        if self.soil_sensor.is_none() && self.capacitive_sensor.is_none() && self.humidity_sensor.is_none() {
            warn!("board: no drivers attached");
        }

        Board {
            soil_sensor: self.soil_sensor,
            capacitive_sensor: self.capacitive_sensor,
            humidity_sensor: self.humidity_sensor,
        }
    }
}

impl<'a, B: I2c, D: DelayNs> Default for BoardBuilder<'a, B, D> {
    fn default() -> Self {
        Self::new()
    }
}
