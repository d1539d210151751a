//! Central Service
//!
//! Public entry point. Owns the native stack, the shared session state and
//! the task that drains native events one at a time.

use crate::domain::error::CentralError;
use crate::domain::models::{AdapterState, NotifyHandler, Peripheral};
use crate::domain::settings::CentralSettings;
use crate::infrastructure::bluetooth::{
    codec,
    connection::ConnectionCallbacks,
    events::{CentralNotice, EventBus},
    operations::{PendingKey, PendingOperation, SubscriptionKey},
    permissions::{AlwaysGranted, Permissions},
    registry::Registry,
    scanner::ScanSession,
    stack::{EventReceiver, NativeEvent, NativeStack, StackError},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Session state. Only touched under the [`Inner::state`] lock.
#[derive(Default)]
pub(crate) struct CentralState {
    pub(crate) registry: Registry,
    pub(crate) scan: Option<ScanSession>,
    pub(crate) scan_generation: u64,
    pub(crate) callbacks: HashMap<String, ConnectionCallbacks>,
    pub(crate) pending: HashMap<PendingKey, PendingOperation>,
    pub(crate) subscriptions: HashMap<SubscriptionKey, NotifyHandler>,
}

pub(crate) struct Inner<S> {
    pub(crate) stack: S,
    pub(crate) state: Mutex<CentralState>,
    pub(crate) bus: EventBus,
    pub(crate) permissions: Box<dyn Permissions>,
    pub(crate) settings: CentralSettings,
}

/// BLE central session core
///
/// Cloning is cheap and every clone drives the same session. Must be created
/// inside a Tokio runtime.
pub struct Central<S: NativeStack> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S: NativeStack> Clone for Central<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: NativeStack> Central<S> {
    /// Create a central over `stack`, draining `events` on a spawned task
    pub fn new(stack: S, events: EventReceiver, settings: CentralSettings) -> Self {
        Self::with_permissions(stack, events, settings, AlwaysGranted)
    }

    pub fn with_permissions<P>(
        stack: S,
        events: EventReceiver,
        settings: CentralSettings,
        permissions: P,
    ) -> Self
    where
        P: Permissions + 'static,
    {
        if !codec::is_supported(&settings.default_encoding) {
            warn!(
                "Unknown default encoding {:?}, text writes fall back to Latin-1",
                settings.default_encoding
            );
        }
        let inner = Arc::new(Inner {
            stack,
            state: Mutex::new(CentralState::default()),
            bus: EventBus::default(),
            permissions: Box::new(permissions),
            settings,
        });
        Self::spawn_event_loop(Arc::downgrade(&inner), events);
        info!("Central session created");
        Self { inner }
    }

    fn spawn_event_loop(inner: Weak<Inner<S>>, mut events: EventReceiver) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Central { inner }.handle_event(event);
            }
            debug!("Native event loop finished");
        });
    }

    /// Route one native event. Events are handled strictly in arrival order.
    pub(crate) fn handle_event(&self, event: NativeEvent) {
        match event {
            NativeEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            NativeEvent::Discovered(peripheral) => self.on_discovered(peripheral),
            NativeEvent::Connected {
                peripheral_id,
                services,
            } => self.on_connected(peripheral_id, services),
            NativeEvent::ConnectFailed {
                peripheral_id,
                reason,
            } => self.on_connect_failed(peripheral_id, reason),
            NativeEvent::Disconnected { peripheral_id } => self.on_disconnected(peripheral_id),
            NativeEvent::ReadComplete {
                peripheral_id,
                service,
                characteristic,
                result,
            } => self.on_read_complete(peripheral_id, service, characteristic, result),
            NativeEvent::WriteComplete {
                peripheral_id,
                service,
                characteristic,
                result,
            } => self.on_write_complete(peripheral_id, service, characteristic, result),
            NativeEvent::ValueChanged {
                peripheral_id,
                service,
                characteristic,
                value,
            } => self.on_value_changed(peripheral_id, service, characteristic, value),
            NativeEvent::NotificationStateChanged {
                peripheral_id,
                service,
                characteristic,
                enabled,
                result,
            } => self.on_notification_state(peripheral_id, service, characteristic, enabled, result),
            NativeEvent::BondStatusChanged {
                peripheral_id,
                state,
            } => {
                debug!("Bond status of {} is now {:?}", peripheral_id, state);
                self.inner.bus.publish(CentralNotice::BondStatusChanged {
                    peripheral_id,
                    state,
                });
            }
        }
    }

    fn on_adapter_state(&self, adapter: AdapterState) {
        info!("Adapter state changed: {:?}", adapter);
        if !adapter.is_on() {
            self.end_scan_session();
        }
        self.inner.bus.publish(CentralNotice::AdapterStatus(adapter));
        self.inner
            .bus
            .publish(CentralNotice::AdapterEnabled(adapter.is_on()));
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CentralState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn stack(&self) -> &S {
        &self.inner.stack
    }

    pub(crate) fn settings(&self) -> &CentralSettings {
        &self.inner.settings
    }

    pub(crate) fn permissions(&self) -> &dyn Permissions {
        self.inner.permissions.as_ref()
    }

    pub(crate) fn publish(&self, notice: CentralNotice) {
        self.inner.bus.publish(notice);
    }

    /// Log, publish and wrap a request the native stack refused
    pub(crate) fn native_failure(
        &self,
        action: &str,
        peripheral_id: Option<&str>,
        reason: StackError,
    ) -> CentralError {
        error!("{} failed: {}", action, reason);
        self.publish(CentralNotice::Error {
            peripheral_id: peripheral_id.map(str::to_string),
            message: format!("{} failed: {}", action, reason),
        });
        CentralError::NativeOperationFailed(reason)
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.inner.stack.adapter_state()
    }

    pub fn is_enabled(&self) -> bool {
        self.adapter_state().is_on()
    }

    /// Listen to the named state-change notices
    pub fn subscribe_events(&self) -> broadcast::Receiver<CentralNotice> {
        self.inner.bus.subscribe()
    }

    /// Registry lookup with the platform fallback
    pub fn find_peripheral(&self, id: &str) -> Option<Peripheral> {
        let state = self.lock();
        state
            .registry
            .find(id, |id| self.inner.stack.retrieve_peripheral(id))
    }
}
