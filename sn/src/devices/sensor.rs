//! Sensor device

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{DeviceError, DeviceEvent, DeviceLink, StopReason};
use crate::channel::{DeviceKind, Identity, Message, MessageChannel};
use crate::shutdown::ShutdownFlag;

pub const DEFAULT_THRESHOLD: i32 = 90;
pub const DEFAULT_MAX_READING: i32 = 100;

type ReadingSource = Box<dyn FnMut() -> i32 + Send>;

/// Periodically reports a reading to the controller
pub struct Sensor {
    name: String,
    threshold: i32,
    max_reading: i32,
    report_interval: Duration,
    last_reading: Option<i32>,
    source: ReadingSource,
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("threshold", &self.threshold)
            .field("max_reading", &self.max_reading)
            .field("last_reading", &self.last_reading)
            .finish()
    }
}

impl Sensor {
    /// Create a sensor reading uniformly from `0..=max_reading`
    pub fn new(
        name: impl Into<String>,
        threshold: i32,
        max_reading: i32,
        report_interval: Duration,
    ) -> Result<Self, DeviceError> {
        if threshold > max_reading {
            return Err(DeviceError::ThresholdAboveMax { threshold, max_reading });
        }
        if max_reading < 0 {
            return Err(DeviceError::NegativeMaxReading(max_reading));
        }

        Ok(Self {
            name: name.into(),
            threshold,
            max_reading,
            report_interval,
            last_reading: None,
            source: Box::new(move || rand::rng().random_range(0..=max_reading)),
        })
    }

    pub fn with_report_interval(mut self, report_interval: Duration) -> Self {
        self.report_interval = report_interval;
        self
    }

    /// Replace the random source
    pub fn with_source(mut self, source: impl FnMut() -> i32 + Send + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Most recent reading sent, if any
    pub fn last_reading(&self) -> Option<i32> {
        self.last_reading
    }

    /// Register with the controller and report until stopped
    pub async fn run(
        &mut self,
        channel: Arc<dyn MessageChannel>,
        identity: Identity,
        poll_interval: Duration,
        shutdown: &ShutdownFlag,
        mut observe: impl FnMut(&DeviceEvent),
    ) -> Result<StopReason, DeviceError> {
        let link = DeviceLink::new(channel, identity, poll_interval);
        let reason = self.serve(&link, shutdown, &mut observe).await?;
        observe(&DeviceEvent::Stopped(reason));
        info!(%identity, ?reason, "Sensor stopped");
        Ok(reason)
    }

    async fn serve(
        &mut self,
        link: &DeviceLink,
        shutdown: &ShutdownFlag,
        observe: &mut impl FnMut(&DeviceEvent),
    ) -> Result<StopReason, DeviceError> {
        if let Some(reason) = link
            .handshake(&self.name, DeviceKind::Sensor, self.threshold, shutdown)
            .await?
        {
            return Ok(reason);
        }
        observe(&DeviceEvent::Connected);

        let mut report = tokio::time::interval(self.report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        report.tick().await;

        loop {
            if shutdown.is_set() {
                return Ok(StopReason::Interrupted);
            }

            tokio::select! {
                _ = report.tick() => self.report(link, observe).await?,
                _ = tokio::time::sleep(link.poll_interval()) => {}
            }

            while let Some(message) = link.poll().await? {
                match message {
                    Message::Stop => return Ok(StopReason::Stopped),
                    Message::Query { command, sequence } => {
                        debug!(identity = %link.identity(), %command, "Sensor::serve: answering query");
                        observe(&DeviceEvent::Query { command, sequence });
                        link.send(Message::QueryResponse {
                            reading: self.last_reading,
                        })
                        .await?;
                    }
                    other => link.unexpected(&other),
                }
            }
        }
    }

    async fn report(&mut self, link: &DeviceLink, observe: &mut impl FnMut(&DeviceEvent)) -> Result<(), DeviceError> {
        let reading = (self.source)();
        self.last_reading = Some(reading);
        let crossed = reading >= self.threshold;
        debug!(identity = %link.identity(), reading, crossed, "Sensor::report: called");
        observe(&DeviceEvent::Reading { reading, crossed });
        link.send(Message::Reading { reading }).await?;
        Ok(())
    }
}
