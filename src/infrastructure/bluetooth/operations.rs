//! GATT Operations
//!
//! Read, write and notification requests. Acknowledged operations park a
//! [`PendingOperation`] keyed by peripheral and kind; the matching native
//! completion event settles it. A disconnect fails every parked operation of
//! that peripheral.

use crate::domain::error::{CentralError, Result};
use crate::domain::models::{
    CharacteristicProperties, CharacteristicRef, OperationKind, ReadResult,
};
use crate::infrastructure::bluetooth::{
    codec::{self, WriteValue},
    gatt::{self, GattTarget},
    service::{Central, CentralState},
    stack::{NativeStack, StackError, WriteKind},
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PendingKey {
    pub(crate) peripheral_id: String,
    pub(crate) kind: OperationKind,
}

impl PendingKey {
    fn new(peripheral_id: &str, kind: OperationKind) -> Self {
        Self {
            peripheral_id: peripheral_id.to_string(),
            kind,
        }
    }
}

enum Settle {
    Read(oneshot::Sender<Result<ReadResult>>),
    Ack(oneshot::Sender<Result<()>>),
}

/// An in-flight request waiting for its completion event
pub(crate) struct PendingOperation {
    service: Uuid,
    characteristic: Uuid,
    settle: Settle,
}

impl PendingOperation {
    fn matches(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.service == service && self.characteristic == characteristic
    }

    fn complete(self, result: Result<Vec<u8>>) {
        let characteristic = self.characteristic;
        // The caller may have stopped waiting
        match self.settle {
            Settle::Read(tx) => {
                let _ = tx.send(result.map(|raw| ReadResult {
                    characteristic,
                    value: codec::decode(&raw),
                    raw,
                }));
            }
            Settle::Ack(tx) => {
                let _ = tx.send(result.map(|_| ()));
            }
        }
    }

    pub(crate) fn fail(self, error: CentralError) {
        self.complete(Err(error));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionKey {
    pub(crate) peripheral_id: String,
    pub(crate) service: Uuid,
    pub(crate) characteristic: Uuid,
}

impl SubscriptionKey {
    fn for_target(target: &GattTarget) -> Self {
        Self {
            peripheral_id: target.peripheral.id.clone(),
            service: target.service.uuid,
            characteristic: target.characteristic.uuid,
        }
    }
}

impl CentralState {
    /// Remove every parked operation of one peripheral
    pub(crate) fn take_pending(&mut self, peripheral_id: &str) -> Vec<PendingOperation> {
        let keys: Vec<PendingKey> = self
            .pending
            .keys()
            .filter(|key| key.peripheral_id == peripheral_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect()
    }

    /// Remove the parked operation only if it targets this characteristic
    fn take_matching(
        &mut self,
        key: &PendingKey,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<PendingOperation> {
        let parked = self
            .pending
            .get(key)
            .map(|op| (op.matches(service, characteristic), op.characteristic));
        match parked {
            Some((true, _)) => self.pending.remove(key),
            Some((false, parked_characteristic)) => {
                warn!(
                    "Ignoring {} completion for {} on {}, {} is pending",
                    key.kind, characteristic, key.peripheral_id, parked_characteristic
                );
                None
            }
            None => None,
        }
    }

    fn ensure_idle(&self, key: &PendingKey) -> Result<()> {
        if self.pending.contains_key(key) {
            return Err(CentralError::Busy {
                peripheral: key.peripheral_id.clone(),
                kind: key.kind,
            });
        }
        Ok(())
    }

    fn park(&mut self, key: PendingKey, target: &GattTarget, settle: Settle) {
        self.pending.insert(
            key,
            PendingOperation {
                service: target.service.uuid,
                characteristic: target.characteristic.uuid,
                settle,
            },
        );
    }
}

/// A sender dropped without settling means the session went away
fn abandoned<T>(peripheral_id: &str) -> impl FnOnce(oneshot::error::RecvError) -> Result<T> + '_ {
    move |_| Err(CentralError::Disconnected(peripheral_id.to_string()))
}

impl<S: NativeStack> Central<S> {
    fn resolve_target(
        &self,
        state: &CentralState,
        target: &CharacteristicRef,
        required: CharacteristicProperties,
    ) -> Result<GattTarget> {
        gatt::resolve(
            self.is_enabled(),
            &state.registry,
            |id| self.stack().retrieve_peripheral(id),
            target,
            Some(required),
        )
    }

    /// Read a characteristic, settling when the stack reports the value
    pub async fn read(&self, target: &CharacteristicRef) -> Result<ReadResult> {
        let settled = {
            let mut state = self.lock();
            let gatt = self.resolve_target(&state, target, CharacteristicProperties::READ)?;
            let key = PendingKey::new(&gatt.peripheral.id, OperationKind::Read);
            state.ensure_idle(&key)?;

            debug!("Reading {} on {}", gatt.characteristic.uuid, gatt.peripheral.id);
            self.stack()
                .read(&gatt.peripheral.id, gatt.service.uuid, gatt.characteristic.uuid)
                .map_err(|e| self.native_failure("Read", Some(&gatt.peripheral.id), e))?;

            let (tx, rx) = oneshot::channel();
            state.park(key, &gatt, Settle::Read(tx));
            rx
        };

        settled
            .await
            .unwrap_or_else(abandoned(&target.peripheral_id))
    }

    /// Write with acknowledgement, settling when the stack confirms it
    ///
    /// Text is encoded with `encoding`, or the configured default.
    pub async fn write(
        &self,
        target: &CharacteristicRef,
        value: Option<WriteValue>,
        encoding: Option<&str>,
    ) -> Result<()> {
        let settled = {
            let mut state = self.lock();
            let (gatt, data) = self.prepare_write(&state, target, value, encoding)?;
            let key = PendingKey::new(&gatt.peripheral.id, OperationKind::Write);
            state.ensure_idle(&key)?;

            self.submit_write(&gatt, &data, WriteKind::WithResponse)?;

            let (tx, rx) = oneshot::channel();
            state.park(key, &gatt, Settle::Ack(tx));
            rx
        };

        settled
            .await
            .unwrap_or_else(abandoned(&target.peripheral_id))
    }

    /// Fire-and-forget write, settled once the stack accepts it
    pub async fn write_without_response(
        &self,
        target: &CharacteristicRef,
        value: Option<WriteValue>,
        encoding: Option<&str>,
    ) -> Result<()> {
        let state = self.lock();
        let (gatt, data) = self.prepare_write(&state, target, value, encoding)?;
        self.submit_write(&gatt, &data, WriteKind::WithoutResponse)
    }

    fn prepare_write(
        &self,
        state: &CentralState,
        target: &CharacteristicRef,
        value: Option<WriteValue>,
        encoding: Option<&str>,
    ) -> Result<(GattTarget, Vec<u8>)> {
        let value = value
            .filter(|v| !v.is_empty())
            .ok_or(CentralError::EmptyValue)?;
        let gatt = self.resolve_target(state, target, CharacteristicProperties::WRITE)?;
        let encoding = encoding.unwrap_or(&self.settings().default_encoding);
        let data = codec::encode(&value, Some(encoding))?;
        Ok((gatt, data))
    }

    fn submit_write(&self, gatt: &GattTarget, data: &[u8], kind: WriteKind) -> Result<()> {
        debug!(
            "Writing {} bytes to {} on {} ({:?})",
            data.len(),
            gatt.characteristic.uuid,
            gatt.peripheral.id,
            kind
        );
        self.stack()
            .write(
                &gatt.peripheral.id,
                gatt.service.uuid,
                gatt.characteristic.uuid,
                data,
                kind,
            )
            .map_err(|e| self.native_failure("Write", Some(&gatt.peripheral.id), e))
    }

    /// Subscribe to value changes. Indicate-only characteristics qualify.
    ///
    /// Settles once the enable request is submitted, or with
    /// `confirm_subscriptions` once the stack reports the new state.
    pub async fn start_notifying<F>(&self, target: &CharacteristicRef, on_notify: F) -> Result<()>
    where
        F: Fn(ReadResult) + Send + Sync + 'static,
    {
        let settled = {
            let mut state = self.lock();
            let gatt = self.resolve_target(&state, target, CharacteristicProperties::NOTIFY)?;
            let key = PendingKey::new(&gatt.peripheral.id, OperationKind::Subscribe);
            let confirm = self.settings().confirm_subscriptions;
            if confirm {
                state.ensure_idle(&key)?;
            }

            info!(
                "Enabling notifications for {} on {}",
                gatt.characteristic.uuid, gatt.peripheral.id
            );
            self.stack()
                .set_notify(
                    &gatt.peripheral.id,
                    gatt.service.uuid,
                    gatt.characteristic.uuid,
                    true,
                )
                .map_err(|e| self.native_failure("Enable notifications", Some(&gatt.peripheral.id), e))?;

            state
                .subscriptions
                .insert(SubscriptionKey::for_target(&gatt), Arc::new(on_notify));

            if !confirm {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.park(key, &gatt, Settle::Ack(tx));
            rx
        };

        settled
            .await
            .unwrap_or_else(abandoned(&target.peripheral_id))
    }

    /// Unsubscribe. Not being subscribed is fine.
    pub async fn stop_notifying(&self, target: &CharacteristicRef) -> Result<()> {
        let mut state = self.lock();
        let gatt = self.resolve_target(&state, target, CharacteristicProperties::NOTIFY)?;

        info!(
            "Disabling notifications for {} on {}",
            gatt.characteristic.uuid, gatt.peripheral.id
        );
        state.subscriptions.remove(&SubscriptionKey::for_target(&gatt));
        self.stack()
            .set_notify(
                &gatt.peripheral.id,
                gatt.service.uuid,
                gatt.characteristic.uuid,
                false,
            )
            .map_err(|e| self.native_failure("Disable notifications", Some(&gatt.peripheral.id), e))
    }

    fn settle_pending(
        &self,
        action: &str,
        key: PendingKey,
        service: Uuid,
        characteristic: Uuid,
        result: std::result::Result<Vec<u8>, StackError>,
    ) {
        let operation = self.lock().take_matching(&key, service, characteristic);
        let Some(operation) = operation else {
            warn!(
                "No {} pending on {} for {}",
                key.kind, key.peripheral_id, characteristic
            );
            return;
        };
        operation.complete(result.map_err(|e| self.native_failure(action, Some(&key.peripheral_id), e)));
    }

    pub(crate) fn on_read_complete(
        &self,
        id: String,
        service: Uuid,
        characteristic: Uuid,
        result: std::result::Result<Vec<u8>, StackError>,
    ) {
        let key = PendingKey::new(&id, OperationKind::Read);
        self.settle_pending("Read", key, service, characteristic, result);
    }

    pub(crate) fn on_write_complete(
        &self,
        id: String,
        service: Uuid,
        characteristic: Uuid,
        result: std::result::Result<(), StackError>,
    ) {
        let key = PendingKey::new(&id, OperationKind::Write);
        self.settle_pending("Write", key, service, characteristic, result.map(|()| Vec::new()));
    }

    pub(crate) fn on_value_changed(
        &self,
        id: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) {
        let key = SubscriptionKey {
            peripheral_id: id,
            service,
            characteristic,
        };
        let handler = self.lock().subscriptions.get(&key).cloned();
        match handler {
            Some(handler) => handler(ReadResult {
                characteristic,
                value: codec::decode(&value),
                raw: value,
            }),
            None => debug!(
                "Value change for {} on {} without a subscription",
                characteristic, key.peripheral_id
            ),
        }
    }

    pub(crate) fn on_notification_state(
        &self,
        id: String,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
        result: std::result::Result<(), StackError>,
    ) {
        let key = PendingKey::new(&id, OperationKind::Subscribe);
        let operation = {
            let mut state = self.lock();
            if result.is_err() {
                state.subscriptions.remove(&SubscriptionKey {
                    peripheral_id: id.clone(),
                    service,
                    characteristic,
                });
            }
            if enabled {
                state.take_matching(&key, service, characteristic)
            } else {
                None
            }
        };

        let outcome = match result {
            Ok(()) => {
                debug!(
                    "Notifications for {} on {} are now {}",
                    characteristic,
                    id,
                    if enabled { "on" } else { "off" }
                );
                Ok(Vec::new())
            }
            Err(e) => Err(self.native_failure("Notification state change", Some(&id), e)),
        };
        if let Some(operation) = operation {
            operation.complete(outcome);
        }
    }
}
