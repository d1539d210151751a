//! BLE Scanner Module
//!
//! Discovery sessions. At most one session is live; starting another one
//! settles the previous session's auto-stop timer first.

use crate::domain::error::{CentralError, Result};
use crate::domain::models::{DiscoveryHandler, Peripheral, ScanOptions};
use crate::infrastructure::bluetooth::{
    events::CentralNotice, gatt::parse_uuid, permissions::ensure_granted, service::Central,
    stack::NativeStack,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ScanTimer {
    task: JoinHandle<()>,
    settle: oneshot::Sender<Result<()>>,
}

/// The live discovery session
pub(crate) struct ScanSession {
    generation: u64,
    on_discovered: DiscoveryHandler,
    timer: Option<ScanTimer>,
}

impl ScanSession {
    /// Cancel the auto-stop timer, if any, and settle its waiter as success
    fn finish(self) {
        if let Some(timer) = self.timer {
            timer.task.abort();
            let _ = timer.settle.send(Ok(()));
        }
    }
}

impl<S: NativeStack> Central<S> {
    /// Start discovering peripherals
    ///
    /// With a duration the returned future settles when the scan auto-stops
    /// (or is superseded); without one it settles as soon as the stack has
    /// accepted the request. A refused auto-stop fails the future.
    pub async fn start_scan<F>(&self, options: ScanOptions, on_discovered: F) -> Result<()>
    where
        F: Fn(Peripheral) + Send + Sync + 'static,
    {
        match self.begin_scan(options, Arc::new(on_discovered))? {
            // A dropped sender means the session was torn down, which also ends the scan
            Some(settled) => settled.await.unwrap_or(Ok(())),
            None => Ok(()),
        }
    }

    fn begin_scan(
        &self,
        options: ScanOptions,
        on_discovered: DiscoveryHandler,
    ) -> Result<Option<oneshot::Receiver<Result<()>>>> {
        if !self.is_enabled() {
            info!("startScan ---- Bluetooth is not enabled.");
            return Err(CentralError::AdapterDisabled);
        }

        let filters = options
            .filters
            .iter()
            .map(|f| parse_uuid(f).ok_or_else(|| CentralError::InvalidIdentifier(f.clone())))
            .collect::<Result<Vec<_>>>()?;

        if !options.skip_permission_check {
            ensure_granted(self.permissions())?;
        }

        let mut state = self.lock();

        if let Some(previous) = state.scan.take() {
            debug!("Superseding scan session {}", previous.generation);
            previous.finish();
        }
        state.registry.clear_discovered();

        info!("Starting BLE scan, service filters: {:?}", filters);
        let services = (!filters.is_empty()).then_some(filters.as_slice());
        self.stack()
            .start_discovery(services)
            .map_err(|e| self.native_failure("Start scan", None, e))?;

        state.scan_generation += 1;
        let generation = state.scan_generation;

        let (timer, settled) = match options.seconds.or(self.settings().default_scan_seconds) {
            Some(seconds) => {
                let (settle, settled) = oneshot::channel();
                let task = self.spawn_scan_timer(generation, Duration::from_secs(seconds));
                (Some(ScanTimer { task, settle }), Some(settled))
            }
            None => (None, None),
        };

        state.scan = Some(ScanSession {
            generation,
            on_discovered,
            timer,
        });

        Ok(settled)
    }

    fn spawn_scan_timer(&self, generation: u64, duration: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = inner.upgrade() {
                Central { inner }.expire_scan(generation);
            }
        })
    }

    fn expire_scan(&self, generation: u64) {
        let mut state = self.lock();
        if state.scan.as_ref().map(|s| s.generation) != Some(generation) {
            return;
        }
        let Some(session) = state.scan.take() else {
            return;
        };

        info!("Scan duration elapsed, stopping scan");
        let stopped = self
            .stack()
            .stop_discovery()
            .map_err(|e| self.native_failure("Stop scan", None, e));
        if let Some(timer) = session.timer {
            let _ = timer.settle.send(stopped);
        }
    }

    /// Stop the active scan, settling a pending timed scan
    pub async fn stop_scan(&self) -> Result<()> {
        if !self.is_enabled() {
            return Err(CentralError::AdapterDisabled);
        }

        let mut state = self.lock();
        if let Some(session) = state.scan.take() {
            session.finish();
        }

        info!("Stopping BLE scan...");
        self.stack()
            .stop_discovery()
            .map_err(|e| self.native_failure("Stop scan", None, e))
    }

    /// Check if a discovery session is live
    pub fn is_scanning(&self) -> bool {
        self.lock().scan.is_some()
    }

    /// Drop the session without a native stop request (the radio already stopped)
    pub(crate) fn end_scan_session(&self) {
        if let Some(session) = self.lock().scan.take() {
            info!("Adapter is no longer on, ending scan session");
            session.finish();
        }
    }

    pub(crate) fn on_discovered(&self, peripheral: Peripheral) {
        let handler = {
            let mut state = self.lock();
            if state.registry.register(peripheral.clone()) {
                debug!(
                    "Discovered {} ({}) rssi {}",
                    peripheral.id, peripheral.name, peripheral.rssi
                );
            }
            state.scan.as_ref().map(|s| s.on_discovered.clone())
        };

        self.publish(CentralNotice::DeviceDiscovered(peripheral.clone()));
        match handler {
            Some(handler) => handler(peripheral),
            None => warn!("Discovery of {} arrived outside a scan session", peripheral.id),
        }
    }
}
