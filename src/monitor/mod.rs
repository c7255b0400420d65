//! Live observation pump over time-series subscriptions
//!
//! An `ObservationMonitor` owns one store subscription and a worker task
//! that drains it, handing each event to a `ChangeConsumer`. When the
//! subscription is quiet the pump backs off instead of spinning.

pub mod mode_transition;
pub mod outlier;

pub use mode_transition::ModeTransitionRecorder;
pub use outlier::OutlierDetector;

use crate::shutdown::StopSignal;
use crate::store::{AttrRef, StoreError, SubscriptionId, TimeSeriesStore, ValueChangeEvent};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Sink for live value-change events
#[async_trait]
pub trait ChangeConsumer: Send + Sync {
    async fn on_event(&self, event: ValueChangeEvent);
}

pub struct ObservationMonitor {
    series: Arc<dyn TimeSeriesStore>,
    subscription: SubscriptionId,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
}

impl ObservationMonitor {
    /// Subscribe to the given attributes and start draining events
    pub async fn start(
        series: Arc<dyn TimeSeriesStore>,
        attributes: &[AttrRef],
        consumer: Arc<dyn ChangeConsumer>,
        backoff: Duration,
        stop: StopSignal,
    ) -> Result<Self, StoreError> {
        let subscription = series.subscribe(attributes).await?;
        log::info!(
            "observing {} attributes on subscription {}",
            attributes.len(),
            subscription
        );

        let worker = tokio::spawn(pump(
            series.clone(),
            subscription,
            consumer,
            backoff,
            stop.clone(),
        ));

        Ok(Self {
            series,
            subscription,
            stop,
            worker: Some(worker),
        })
    }

    /// Stop the pump, wait for it to drain, and drop the subscription
    pub async fn shutdown(mut self) -> Result<(), StoreError> {
        self.stop.stop();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                log::warn!("observation worker ended abnormally: {}", e);
            }
        }
        self.series.unsubscribe(self.subscription).await
    }
}

async fn pump(
    series: Arc<dyn TimeSeriesStore>,
    subscription: SubscriptionId,
    consumer: Arc<dyn ChangeConsumer>,
    backoff: Duration,
    stop: StopSignal,
) {
    loop {
        if stop.is_stopped() {
            break;
        }
        match series.drain_events(subscription).await {
            Ok(events) if events.is_empty() => tokio::time::sleep(backoff).await,
            Ok(events) => {
                for event in events {
                    consumer.on_event(event).await;
                }
            }
            Err(e) => {
                log::warn!("draining subscription {} failed: {}", subscription, e);
                tokio::time::sleep(backoff).await;
            }
        }
    }
    log::debug!("observation pump for subscription {} stopped", subscription);
}
