use std::sync::Arc;
use std::time::Duration;

use strata_audit::{DriftEvent, EventSink};
use strata_core::{ResourceId, ResourceState, ResourceStatus};
use strata_storage::StateStore;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapter::{with_timeout, AdapterRegistry};
use crate::context::ProviderContext;
use crate::error::{AdapterError, ReconcileError};

/// What one detection pass found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// Records that were read from the provider.
    pub checked: usize,
    /// Live parameters differ from the last applied ones.
    pub drifted: Vec<ResourceId>,
    /// The provider no longer has the resource.
    pub missing: Vec<ResourceId>,
    /// Reads that failed; those records were left as they were.
    pub unreadable: Vec<ResourceId>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty() && self.missing.is_empty()
    }
}

enum Observation {
    InSync,
    Drifted(DriftEvent),
    Missing(DriftEvent),
}

/// Compares live provider state against last-applied state and flags
/// divergence. Read-only towards providers: it never corrects anything,
/// it marks records `Degraded` and leaves convergence to the next apply.
pub struct DriftDetector {
    registry: AdapterRegistry,
    store: Arc<StateStore>,
    context: ProviderContext,
    call_timeout: Duration,
    sink: Arc<dyn EventSink>,
    pass: Mutex<()>,
}

impl DriftDetector {
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<StateStore>,
        context: ProviderContext,
        call_timeout: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            store,
            context,
            call_timeout,
            sink,
            pass: Mutex::new(()),
        }
    }

    /// Read every `Applied` resource once and record what was seen.
    ///
    /// A second caller waits for the running pass to finish rather than
    /// overlapping it.
    pub async fn detect_once(&self) -> Result<DriftReport, ReconcileError> {
        let _pass = self.pass.lock().await;
        let candidates: Vec<ResourceState> = self
            .store
            .list_all()
            .into_iter()
            .filter(|s| s.is_applied() && s.exists_remotely())
            .collect();

        let mut report = DriftReport::default();
        let mut touched = false;

        for record in candidates {
            match self.observe(&record).await {
                Ok(Some(observation)) => {
                    report.checked += 1;
                    touched = true;
                    match observation {
                        Observation::InSync => {}
                        Observation::Drifted(event) => {
                            tracing::warn!(
                                id = %record.id,
                                kind = %record.kind,
                                fields = ?event.field_names(),
                                "drift detected"
                            );
                            self.sink.emit_drift(&event);
                            report.drifted.push(record.id);
                        }
                        Observation::Missing(event) => {
                            tracing::warn!(id = %record.id, kind = %record.kind, "resource missing at provider");
                            self.sink.emit_drift(&event);
                            report.missing.push(record.id);
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(id = %record.id, "record changed during drift read, skipping");
                }
                Err(e) => {
                    tracing::warn!(id = %record.id, kind = %record.kind, error = %e, "drift read failed");
                    report.unreadable.push(record.id);
                }
            }
        }

        if touched {
            self.store.persist().await?;
        }
        tracing::debug!(
            checked = report.checked,
            drifted = report.drifted.len(),
            missing = report.missing.len(),
            "drift pass complete"
        );
        Ok(report)
    }

    /// Run passes every `every` until `shutdown` fires.
    pub async fn run(&self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?every, "drift detector started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.detect_once().await {
                        tracing::warn!(error = %e, "drift pass failed");
                    }
                }
            }
        }
        tracing::info!("drift detector stopped");
    }

    /// Read one record and write the observation back. `Ok(None)` when the
    /// record moved on while the read was in flight.
    async fn observe(&self, record: &ResourceState) -> Result<Option<Observation>, AdapterError> {
        let (Some(handle), Some(expected)) = (&record.provider_handle, &record.last_applied) else {
            return Ok(None);
        };
        let adapter = self
            .registry
            .get(record.kind)
            .map_err(|e| AdapterError::Failed(e.to_string()))?;

        let read = with_timeout(self.call_timeout, adapter.read(&self.context, handle)).await;
        let (live, observation) = match read {
            Ok(live) => {
                let fields = expected.diff(&live);
                let observation = if fields.is_empty() {
                    Observation::InSync
                } else {
                    Observation::Drifted(DriftEvent::changed(record.id.clone(), record.kind, fields))
                };
                (Some(live), observation)
            }
            Err(AdapterError::NotFound) => (
                None,
                Observation::Missing(DriftEvent::missing(record.id.clone(), record.kind)),
            ),
            Err(e) => return Err(e),
        };

        let degraded = !matches!(observation, Observation::InSync);
        let written = self.store.update(&record.id, |current| {
            let unchanged = current.status == ResourceStatus::Applied
                && current.last_applied.as_ref() == Some(expected)
                && current.provider_handle.as_ref() == Some(handle);
            if !unchanged {
                return false;
            }
            current.live = live;
            if degraded {
                current.status = ResourceStatus::Degraded;
            }
            true
        });

        Ok(written.unwrap_or(false).then_some(observation))
    }
}
