use embassy_time::{Instant, Timer};
use heapless::Vec;

use crate::config::{ChannelConfig, DriverConfig as _};
use crate::device::Device;
use crate::error::{ConfigError, Error};
use crate::schedule::PollingSchedule;
use crate::sink::MeasurementSink;

/// Upper bound on the channels a single device exposes.
pub const MAX_CHANNELS: usize = 4;

/// One independently enabled measurement stream of a device.
pub trait Channel: Copy + PartialEq + 'static {
    /// Every channel, in the order a cycle reads them.
    const ALL: &'static [Self];

    fn name(self) -> &'static str;

    fn default_config(self) -> ChannelConfig;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverState {
    Uninitialized,
    Ready,
    Polling,
    Idle,
}

impl DriverState {
    pub fn is_active(self) -> bool {
        matches!(self, DriverState::Ready | DriverState::Idle)
    }
}

/// Outcome of every enabled channel in one update cycle, in read order.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport<C> {
    outcomes: Vec<(C, Result<f32, Error>), MAX_CHANNELS>,
}

impl<C: Channel> CycleReport<C> {
    fn new() -> Self {
        Self { outcomes: Vec::new() }
    }

    fn push(&mut self, channel: C, outcome: Result<f32, Error>) {
        // bounded by the number of bindings, which never exceeds MAX_CHANNELS
        let _ = self.outcomes.push((channel, outcome));
    }

    pub fn get(&self, channel: C) -> Option<Result<f32, Error>> {
        self.outcomes.iter().find(|(c, _)| *c == channel).map(|(_, outcome)| *outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(C, Result<f32, Error>)> {
        self.outcomes.iter()
    }

    pub fn failures(&self) -> impl Iterator<Item = (C, Error)> + '_ {
        self.outcomes.iter().filter_map(|(c, outcome)| outcome.err().map(|e| (*c, e)))
    }

    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_ok())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

struct Binding<'a, C> {
    channel: C,
    config: ChannelConfig,
    sink: Option<&'a dyn MeasurementSink>,
}

/// Periodic acquisition and publication for one device.
///
/// Sinks are borrowed, never owned: they must outlive the driver. Channels
/// and sinks are fixed once [`PollingDriver::setup`] has run.
pub struct PollingDriver<'a, D: Device> {
    device: D,
    schedule: PollingSchedule,
    channels: Vec<Binding<'a, D::Channel>, MAX_CHANNELS>,
    state: DriverState,
}

impl<'a, D: Device> PollingDriver<'a, D> {
    pub fn new(device: D) -> Result<Self, Error> {
        let config = device.config();
        config.validate()?;

        let mut channels = Vec::new();
        for &channel in D::Channel::ALL {
            if let Some(channel_config) = config.channel(channel) {
                channels
                    .push(Binding {
                        channel,
                        config: channel_config,
                        sink: None,
                    })
                    .map_err(|_| ConfigError::TooManyChannels)?;
            }
        }
        let schedule = PollingSchedule::new(config.update_interval());

        Ok(Self {
            device,
            schedule,
            channels,
            state: DriverState::Uninitialized,
        })
    }

    /// Attach the consumer of `channel`. Ignored for channels that are not
    /// configured and once the driver has been set up.
    pub fn with_sink(mut self, channel: D::Channel, sink: &'a dyn MeasurementSink) -> Self {
        if self.state != DriverState::Uninitialized {
            warn!("{=str}: sink for {=str} rejected after setup", D::NAME, channel.name());
            return self;
        }

        match self.channels.iter_mut().find(|b| b.channel == channel) {
            Some(binding) => binding.sink = Some(sink),
            None => warn!("{=str}: {=str} is not enabled, sink ignored", D::NAME, channel.name()),
        }

        self
    }

    pub async fn setup(&mut self) -> Result<D::Info, Error> {
        if let Some(binding) = self.channels.iter().find(|b| b.sink.is_none()) {
            error!("{=str}: {=str} is enabled without a sink", D::NAME, binding.channel.name());
            return Err(ConfigError::MissingSink.into());
        }

        if !self.device.probe().await {
            error!("{=str}: device did not acknowledge the presence probe", D::NAME);
            return Err(Error::DeviceNotFound);
        }

        let info = self.device.init().await.inspect_err(|e| error!("{=str}: failed to initialize: {}", D::NAME, e))?;

        self.state = DriverState::Ready;
        info!("{=str}: ready with {=usize} channel(s)", D::NAME, self.channels.len());

        Ok(info)
    }

    /// One read/decode/publish pass over the enabled channels. A failing
    /// channel is reported and skipped, the remaining channels still run.
    pub async fn update(&mut self) -> CycleReport<D::Channel> {
        let mut report = CycleReport::new();

        if !self.state.is_active() {
            warn!("{=str}: update skipped, driver is not set up", D::NAME);
            return report;
        }

        // back to Idle when the cycle ends, also if the future is dropped
        let _cycle = CycleGuard::enter(&mut self.state);

        if !self.channels.is_empty() {
            self.device.begin_cycle();
        }

        for binding in self.channels.iter() {
            let outcome = self.device.read_channel(binding.channel).await;

            match outcome {
                Ok(value) => {
                    debug!(
                        "{=str}: {=str} {} {=str}",
                        D::NAME,
                        binding.channel.name(),
                        binding.config.round(value),
                        binding.config.unit.symbol()
                    );
                    if let Some(sink) = binding.sink {
                        sink.publish(value);
                    }
                }
                Err(e) if e.is_transient() => warn!("{=str}: reading {=str} failed: {}", D::NAME, binding.channel.name(), e),
                Err(e) => error!("{=str}: reading {=str} failed: {}", D::NAME, binding.channel.name(), e),
            }

            report.push(binding.channel, outcome);
        }

        report
    }

    /// Anchors the schedule; the first automatic cycle is one interval later.
    pub fn start(&mut self, now: Instant) {
        self.schedule.anchor(now);
    }

    /// Runs a cycle if one is due at `now`.
    pub async fn poll(&mut self, now: Instant) -> Option<CycleReport<D::Channel>> {
        if !self.state.is_active() {
            return None;
        }

        if self.schedule.due(now) {
            Some(self.update().await)
        } else {
            None
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state.is_active() {
            self.schedule.next_deadline()
        } else {
            None
        }
    }

    /// Drives the schedule forever on the embassy timer.
    pub async fn run(&mut self) -> ! {
        self.start(Instant::now());

        loop {
            Timer::at(self.next_deadline().unwrap_or(Instant::MAX)).await;
            self.poll(Instant::now()).await;
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

struct CycleGuard<'s> {
    state: &'s mut DriverState,
}

impl<'s> CycleGuard<'s> {
    fn enter(state: &'s mut DriverState) -> Self {
        *state = DriverState::Polling;
        Self { state }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self.state = DriverState::Idle;
    }
}
