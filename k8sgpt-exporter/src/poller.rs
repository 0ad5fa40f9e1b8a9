//! Periodic poll loop: fetch, aggregate, reconcile.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use k8sgpt_common::ExtractionPolicy;

use crate::aggregate::{NamespaceFilter, aggregate_records};
use crate::collector::SharedCollector;
use crate::source::{SharedSource, SourceError};

/// Drives one record source into the metric collector.
pub struct Poller {
    source: SharedSource,
    collector: SharedCollector,
    policy: ExtractionPolicy,
    filter: NamespaceFilter,
    interval: Duration,
}

impl Poller {
    /// Create a poller using the default K8sGPT extraction policy.
    pub fn new(
        source: SharedSource,
        collector: SharedCollector,
        filter: NamespaceFilter,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            collector,
            policy: ExtractionPolicy::default(),
            filter,
            interval,
        }
    }

    /// Replace the extraction policy.
    pub fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run poll cycles until the shutdown signal is received.
    ///
    /// Cycles start on a fixed interval. A cycle that overruns the interval is
    /// followed immediately by the next one; missed ticks are not replayed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            source = %self.source.describe(),
            interval_secs = self.interval.as_secs_f64(),
            "Starting poll loop"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poll loop stopped");
    }

    /// Run one cycle, counting failures instead of returning them.
    pub async fn poll_cycle(&self) {
        match self.poll_once().await {
            Ok(records) => {
                debug!(records, "Poll cycle complete");
            }
            Err(e) => {
                self.collector.record_failure();
                match e {
                    SourceError::Fetch(_) => error!(error = %e, "Poll cycle failed"),
                    SourceError::Decode(_) => warn!(error = %e, "Poll cycle failed"),
                }
            }
        }
    }

    /// Fetch, aggregate and reconcile once. On error nothing is written.
    pub async fn poll_once(&self) -> Result<usize, SourceError> {
        let records = self.source.fetch().await?;
        let aggregate = aggregate_records(&records, &self.policy, &self.filter);
        let summary = self.collector.reconcile(&aggregate);
        self.collector.record_success(aggregate.records);

        info!(
            fetched = records.len(),
            counted = aggregate.records,
            filtered = aggregate.filtered,
            series = summary.set,
            retired = summary.retired,
            "Metrics updated"
        );

        Ok(aggregate.records)
    }
}
