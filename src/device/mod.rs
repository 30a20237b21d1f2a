use crate::config::DriverConfig;
use crate::error::Error;
use crate::sensor::Channel;

/// Device specific half of a polling driver: how to find the chip, bring it up
/// and turn one channel's registers into a physical value.
pub trait Device {
    type Channel: Channel;
    type Config: DriverConfig<Channel = Self::Channel>;
    type Info;

    /// Short name used in log messages.
    const NAME: &'static str;

    /// The validated configuration the device was built from. Channels,
    /// interval and bus parameters all come from here.
    fn config(&self) -> &Self::Config;

    /// Presence check, issued once before `init`.
    async fn probe(&mut self) -> bool;

    /// Reset and identify the chip, apply its register configuration.
    async fn init(&mut self) -> Result<Self::Info, Error>;

    /// Called at the start of every cycle that reads at least one channel.
    fn begin_cycle(&mut self) {}

    /// Issue the transactions for one channel and decode the result.
    async fn read_channel(&mut self, channel: Self::Channel) -> Result<f32, Error>;
}
