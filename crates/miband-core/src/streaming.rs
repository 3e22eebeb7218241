//! Producer/consumer pipeline from the band to the persistence sink.
//!
//! A producer task reads the session's heart-rate stream and pushes values
//! into a bounded channel. The consumer (the caller's task) drains the
//! channel, stamps each value, writes it to the sink and publishes it as the
//! live status.
//!
//! - A full channel blocks the producer; nothing is dropped under load.
//! - Values are persisted in notification order, exactly once each.
//! - On cancellation the producer stops first. Its sender is then gone, so
//!   the consumer drains what is already queued and sees the channel close.
//! - A failed read ends the producer the same way.
//!
//! [`StreamingPipeline::run`] returns only after the producer task has been
//! joined and the channel closed. Releasing the connection is left to the
//! caller, which owns it.

use std::sync::Arc;

use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use miband_types::{BpmSample, LiveStatus};

use crate::error::{Error, Result};
use crate::traits::{BandSession, HeartRateSink, HeartRateStream, LifecycleReporter};

/// Options for the streaming pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Capacity of the channel between producer and consumer.
    /// Default: 16 samples.
    pub buffer_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { buffer_size: 16 }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel capacity.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Check that the options can be used.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::invalid_config("buffer_size must be > 0"));
        }
        Ok(())
    }
}

/// Why the producer stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProducerExit {
    Cancelled,
    LinkClosed(String),
    ConsumerClosed,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEnd {
    /// The cancellation token fired.
    Cancelled,
    /// The device side went away (read error, end of stream, producer fault).
    LinkClosed { reason: String },
}

/// Result of a pipeline run that did not hit a sink failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Samples written to the sink.
    pub samples_persisted: u64,
    /// The last sample written, if any.
    pub last_sample: Option<BpmSample>,
    /// What ended the run.
    pub end: PipelineEnd,
}

/// Capture clock that never repeats or goes back.
///
/// Two notifications handled within the clock's resolution still get
/// distinct, ordered timestamps.
#[derive(Debug, Default)]
pub(crate) struct SampleClock {
    last: Option<OffsetDateTime>,
}

impl SampleClock {
    pub(crate) fn stamp(&mut self) -> OffsetDateTime {
        let mut now = OffsetDateTime::now_utc();
        if let Some(last) = self.last
            && now <= last
        {
            now = last + time::Duration::microseconds(1);
        }
        self.last = Some(now);
        now
    }
}

/// Moves samples from a session to a sink.
#[derive(Debug, Clone, Default)]
pub struct StreamingPipeline {
    options: PipelineOptions,
}

impl StreamingPipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Stream from `session` into `sink` until cancelled or the link drops.
    ///
    /// Every persisted value is published on `live` and reported to
    /// `reporter`. A sink failure stops the producer and is returned as
    /// [`Error::Persistence`].
    #[tracing::instrument(level = "info", skip_all, fields(device = %session.device().address))]
    pub async fn run<S, K, R>(
        &self,
        session: Arc<S>,
        sink: &mut K,
        reporter: &R,
        live: &watch::Sender<LiveStatus>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome>
    where
        S: BandSession,
        K: HeartRateSink + ?Sized,
        R: LifecycleReporter + ?Sized,
    {
        self.options.validate()?;

        let stream = session.heart_rate_stream().await?;
        let (tx, mut rx) = mpsc::channel::<u16>(self.options.buffer_size);
        let producer_token = cancel.child_token();
        let producer = tokio::spawn(produce(stream, tx, producer_token.clone()));

        let device = session.device();
        let mut clock = SampleClock::default();
        let mut samples_persisted: u64 = 0;
        let mut last_sample = None;

        let consumed: Result<()> = loop {
            let Some(bpm) = rx.recv().await else {
                break Ok(());
            };
            let sample = BpmSample::new(clock.stamp(), bpm);
            if let Err(e) = sink.insert(device, &sample).await {
                warn!("Sink rejected sample, stopping session: {}", e);
                break Err(Error::persistence(e));
            }
            samples_persisted += 1;
            last_sample = Some(sample);
            debug!("{} bpm", bpm);
            live.send_replace(LiveStatus::Bpm(bpm));
            reporter.report_status(LiveStatus::Bpm(bpm));
        };

        // Stop the producer, then close the channel.
        producer_token.cancel();
        let exit = match producer.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("Producer task failed: {}", e);
                ProducerExit::LinkClosed(format!("producer task failed: {}", e))
            }
        };
        rx.close();
        drop(rx);

        consumed?;

        let end = match exit {
            ProducerExit::Cancelled | ProducerExit::ConsumerClosed => PipelineEnd::Cancelled,
            ProducerExit::LinkClosed(reason) => PipelineEnd::LinkClosed { reason },
        };
        info!(
            "Pipeline finished after {} sample(s): {:?}",
            samples_persisted, end
        );
        Ok(PipelineOutcome {
            samples_persisted,
            last_sample,
            end,
        })
    }
}

async fn produce(
    mut stream: HeartRateStream,
    tx: mpsc::Sender<u16>,
    token: CancellationToken,
) -> ProducerExit {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Producer cancelled, stopping gracefully");
                return ProducerExit::Cancelled;
            }
            next = stream.next() => next,
        };

        let bpm = match next {
            Some(Ok(bpm)) => bpm,
            Some(Err(e)) => {
                warn!("Heart-rate read failed: {}", e);
                return ProducerExit::LinkClosed(e.to_string());
            }
            None => {
                warn!("Heart-rate stream ended");
                return ProducerExit::LinkClosed("notification stream ended".to_string());
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Producer cancelled while waiting for channel capacity");
                return ProducerExit::Cancelled;
            }
            sent = tx.send(bpm) => {
                if sent.is_err() {
                    debug!("Consumer closed the channel, stopping");
                    return ProducerExit::ConsumerClosed;
                }
            }
        }
    }
}
