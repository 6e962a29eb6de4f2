use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::Result;
use crate::mqtt::client::ReportSink;
use crate::mystrom::client::SwitchClient;
use crate::registry::Device;

/// Fetches one switch's `/report` on a timer and republishes it untouched.
pub struct ReportPoller<S> {
    device: Device,
    topic: String,
    switch: SwitchClient,
    sink: S,
}

impl<S: ReportSink> ReportPoller<S> {
    pub fn new(device: Device, topic: String, switch: SwitchClient, sink: S) -> Self {
        Self {
            device,
            topic,
            switch,
            sink,
        }
    }

    /// Poll forever. The first cycle runs right away; a failed cycle is
    /// logged and the next tick simply tries again.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_and_publish().await {
                warn!("Polling {} ({}) failed: {}", self.device.name, self.device.address, e);
            }
        }
    }

    /// One fetch-publish cycle.
    pub async fn poll_and_publish(&self) -> Result<()> {
        let report = self.switch.fetch_report(&self.device.address).await?;
        let len = report.len();
        self.sink.publish_report(&self.topic, report).await?;
        info!("Published {} bytes to {}", len, self.topic);
        Ok(())
    }
}
