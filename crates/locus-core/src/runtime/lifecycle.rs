//! Runtime lifecycle management including background tasks and graceful shutdown.

use crate::{
    config::AppConfig, metrics::MetricsCollector, store::StateStore,
    validation::ValidationProcessor,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{builder::LocusRuntimeBuilder, LocusComponents};

/// Main runtime container managing component lifecycles and background tasks.
///
/// Owns all initialized components and the store purge task. `shutdown()` signals every
/// subscriber of the shutdown channel, including worker loops started by the binary, and
/// waits for the purge task to finish.
pub struct LocusRuntime {
    components: LocusComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    purge_task: Option<JoinHandle<()>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl LocusRuntime {
    /// Creates a new builder for constructing a `LocusRuntime`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let runtime = LocusRuntime::builder()
    ///     .with_config(config)
    ///     .build()
    ///     .await?;
    /// ```
    #[must_use]
    pub fn builder() -> LocusRuntimeBuilder {
        LocusRuntimeBuilder::new()
    }

    /// Called by `LocusRuntimeBuilder`; starts the purge task when an interval is given.
    pub(super) fn new(
        components: LocusComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        purge_interval: Option<Duration>,
    ) -> Self {
        let shutdown_initiated = Arc::new(AtomicBool::new(false));
        let purge_task = purge_interval.map(|interval| {
            let handle = Self::start_store_purge(
                components.state_store().clone(),
                interval,
                shutdown_tx.subscribe(),
            );
            debug!(interval_secs = interval.as_secs(), "Store purge task started");
            handle
        });

        Self { components, shutdown_tx, config, purge_task, shutdown_initiated }
    }

    #[must_use]
    pub fn components(&self) -> &LocusComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Convenience accessor for the validation processor.
    #[must_use]
    pub fn processor(&self) -> &Arc<ValidationProcessor> {
        self.components.processor()
    }

    /// Convenience accessor for the metrics collector.
    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        self.components.metrics_collector()
    }

    /// Creates a new shutdown receiver for worker loops and other custom tasks.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Returns a sender that triggers shutdown, for signal handlers.
    #[must_use]
    pub fn shutdown_trigger(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Initiates graceful shutdown of all background tasks.
    ///
    /// Idempotent: a second signal after the first is ignored.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating Locus runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "Failed to send shutdown signal (no receivers)");
        }
        debug!("Shutdown signal broadcast to all tasks");

        if let Some(purge_task) = self.purge_task {
            match purge_task.await {
                Ok(()) => debug!("Store purge task completed"),
                Err(e) if e.is_cancelled() => debug!("Store purge task cancelled"),
                Err(e) => error!(error = %e, "Store purge task failed"),
            }
        }

        info!("Locus runtime shutdown complete");
    }

    /// Waits for a shutdown signal on the runtime's channel, then performs cleanup.
    pub async fn wait_for_shutdown(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, runtime terminating");
        self.shutdown().await;
    }

    fn start_store_purge(
        store: Arc<dyn StateStore>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Store purge task received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match store.purge_expired().await {
                            Ok(0) => {}
                            Ok(purged) => debug!(purged, "Purged expired store entries"),
                            Err(e) => warn!(error = %e, "Failed to purge expired store entries"),
                        }
                    }
                }
            }
        })
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<LocusRuntime>;
    let _ = assert_sync::<LocusRuntime>;
};
