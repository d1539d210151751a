//! Simulated Native Stack
//!
//! An in-process [`NativeStack`] that records every request and lets the
//! owner inject events. With auto-respond on it answers requests the way a
//! well-behaved peripheral would, which is what the demo binary runs on.

use crate::domain::models::{
    AdapterState, AdvertisementData, Characteristic, CharacteristicProperties, Peripheral,
    Service,
};
use crate::infrastructure::bluetooth::stack::{
    EventReceiver, EventSink, NativeEvent, NativeStack, StackError, WriteKind,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A request the core submitted to the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeRequest {
    StartDiscovery(Option<Vec<Uuid>>),
    StopDiscovery,
    Connect(String),
    CancelConnection(String),
    Read {
        peripheral_id: String,
        service: Uuid,
        characteristic: Uuid,
    },
    Write {
        peripheral_id: String,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
        kind: WriteKind,
    },
    SetNotify {
        peripheral_id: String,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    },
}

#[derive(Default)]
struct SimState {
    adapter: Option<AdapterState>,
    /// Peripherals reported when discovery starts
    advertising: Vec<Peripheral>,
    /// Peripherals the platform remembers from earlier sessions
    known: HashMap<String, Peripheral>,
    values: HashMap<(String, Uuid), Vec<u8>>,
    requests: Vec<NativeRequest>,
    refusal: Option<StackError>,
    auto_respond: bool,
}

impl SimState {
    fn device(&self, id: &str) -> Option<&Peripheral> {
        self.advertising
            .iter()
            .find(|p| p.id == id)
            .or_else(|| self.known.get(id))
    }
}

struct SimInner {
    state: Mutex<SimState>,
    sink: EventSink,
    issued_tx: mpsc::UnboundedSender<NativeRequest>,
    issued_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<NativeRequest>>,
}

#[derive(Clone)]
pub struct SimulatedStack {
    inner: Arc<SimInner>,
}

impl SimulatedStack {
    /// Create a stack with the adapter in the `Unknown` state, plus the
    /// receiver to hand to the central
    pub fn new() -> (Self, EventReceiver) {
        let (sink, events) = EventSink::channel();
        let (issued_tx, issued_rx) = mpsc::unbounded_channel();
        let stack = Self {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState::default()),
                sink,
                issued_tx,
                issued_rx: tokio::sync::Mutex::new(issued_rx),
            }),
        };
        (stack, events)
    }

    /// A powered-on, auto-responding stack advertising two sample devices
    pub fn with_sample_devices() -> (Self, EventReceiver) {
        let (stack, events) = Self::new();
        stack.set_auto_respond(true);
        stack.set_adapter_state(AdapterState::On);

        let heart_rate = Peripheral::new(Uuid::new_v4().to_string(), "Polar H10", -58)
            .with_advertisement(AdvertisementData {
                manufacturer_id: Some(0x006b),
                manufacturer_data: Some(vec![0x33, 0x1e]),
                local_name: Some("Polar H10".to_string()),
                service_uuids: vec![HEART_RATE_SERVICE],
            })
            .with_services(vec![heart_rate_service()]);
        stack.set_value(&heart_rate.id, HEART_RATE_MEASUREMENT, vec![0x00, 0x48]);
        stack.set_value(&heart_rate.id, BODY_SENSOR_LOCATION, vec![0x01]);
        stack.add_device(heart_rate);

        stack.add_device(
            Peripheral::new(Uuid::new_v4().to_string(), "Thermometer", -81).with_advertisement(
                AdvertisementData {
                    local_name: Some("Thermometer".to_string()),
                    ..Default::default()
                },
            ),
        );
        (stack, events)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an event to the core as if the radio had reported it
    pub fn emit(&self, event: NativeEvent) {
        if !self.inner.sink.send(event) {
            debug!("Simulated event dropped, central is gone");
        }
    }

    pub fn set_adapter_state(&self, adapter: AdapterState) {
        self.lock().adapter = Some(adapter);
        self.emit(NativeEvent::AdapterStateChanged(adapter));
    }

    /// Advertise a device; it is reported whenever discovery starts
    pub fn add_device(&self, peripheral: Peripheral) {
        self.lock().advertising.push(peripheral);
    }

    /// Remember a device for identifier lookup without advertising it
    pub fn add_known_peripheral(&self, peripheral: Peripheral) {
        self.lock().known.insert(peripheral.id.clone(), peripheral);
    }

    /// Value returned by auto-responded reads
    pub fn set_value(&self, peripheral_id: &str, characteristic: Uuid, value: Vec<u8>) {
        self.lock()
            .values
            .insert((peripheral_id.to_string(), characteristic), value);
    }

    pub fn set_auto_respond(&self, enabled: bool) {
        self.lock().auto_respond = enabled;
    }

    /// Refuse every following request with `reason`
    pub fn refuse_requests(&self, reason: &str) {
        self.lock().refusal = Some(reason.to_string());
    }

    pub fn accept_requests(&self) {
        self.lock().refusal = None;
    }

    /// Every request submitted so far, refused ones included
    pub fn requests(&self) -> Vec<NativeRequest> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
        if let Ok(mut issued) = self.inner.issued_rx.try_lock() {
            while issued.try_recv().is_ok() {}
        }
    }

    /// Wait for the next request the core submits
    pub async fn next_request(&self) -> Option<NativeRequest> {
        self.inner.issued_rx.lock().await.recv().await
    }

    /// Record `request`, then either refuse it or answer it
    fn submit<F>(&self, request: NativeRequest, respond: F) -> Result<(), StackError>
    where
        F: FnOnce(&SimState) -> Vec<NativeEvent>,
    {
        let replies = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            let _ = self.inner.issued_tx.send(request);

            if let Some(reason) = &state.refusal {
                return Err(reason.clone());
            }
            if state.auto_respond {
                respond(&state)
            } else {
                Vec::new()
            }
        };

        for event in replies {
            self.emit(event);
        }
        Ok(())
    }
}

impl NativeStack for SimulatedStack {
    fn adapter_state(&self) -> AdapterState {
        self.lock().adapter.unwrap_or(AdapterState::Unknown)
    }

    fn start_discovery(&self, services: Option<&[Uuid]>) -> Result<(), StackError> {
        let filters = services.map(<[Uuid]>::to_vec);
        let request = NativeRequest::StartDiscovery(filters.clone());
        self.submit(request, |_| Vec::new())?;

        // Advertisements flow whether or not auto-respond is on
        let found: Vec<Peripheral> = self
            .lock()
            .advertising
            .iter()
            .filter(|p| match &filters {
                None => true,
                Some(filters) => p
                    .advertisement
                    .as_ref()
                    .is_some_and(|ad| ad.service_uuids.iter().any(|u| filters.contains(u))),
            })
            .map(|p| Peripheral {
                services: Vec::new(),
                ..p.clone()
            })
            .collect();
        for peripheral in found {
            self.emit(NativeEvent::Discovered(peripheral));
        }
        Ok(())
    }

    fn stop_discovery(&self) -> Result<(), StackError> {
        self.submit(NativeRequest::StopDiscovery, |_| Vec::new())
    }

    fn retrieve_peripheral(&self, id: &str) -> Option<Peripheral> {
        self.lock().known.get(id).cloned()
    }

    fn connect(&self, peripheral_id: &str) -> Result<(), StackError> {
        let request = NativeRequest::Connect(peripheral_id.to_string());
        self.submit(request, |state| {
            let event = match state.device(peripheral_id) {
                Some(device) => NativeEvent::Connected {
                    peripheral_id: peripheral_id.to_string(),
                    services: device.services.clone(),
                },
                None => NativeEvent::ConnectFailed {
                    peripheral_id: peripheral_id.to_string(),
                    reason: "device out of range".to_string(),
                },
            };
            vec![event]
        })
    }

    fn cancel_connection(&self, peripheral_id: &str) -> Result<(), StackError> {
        let request = NativeRequest::CancelConnection(peripheral_id.to_string());
        self.submit(request, |_| {
            vec![NativeEvent::Disconnected {
                peripheral_id: peripheral_id.to_string(),
            }]
        })
    }

    fn read(
        &self,
        peripheral_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), StackError> {
        let request = NativeRequest::Read {
            peripheral_id: peripheral_id.to_string(),
            service,
            characteristic,
        };
        self.submit(request, |state| {
            let value = state
                .values
                .get(&(peripheral_id.to_string(), characteristic))
                .cloned()
                .unwrap_or_default();
            vec![NativeEvent::ReadComplete {
                peripheral_id: peripheral_id.to_string(),
                service,
                characteristic,
                result: Ok(value),
            }]
        })
    }

    fn write(
        &self,
        peripheral_id: &str,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<(), StackError> {
        let request = NativeRequest::Write {
            peripheral_id: peripheral_id.to_string(),
            service,
            characteristic,
            data: data.to_vec(),
            kind,
        };
        self.submit(request, |_| match kind {
            WriteKind::WithResponse => vec![NativeEvent::WriteComplete {
                peripheral_id: peripheral_id.to_string(),
                service,
                characteristic,
                result: Ok(()),
            }],
            WriteKind::WithoutResponse => Vec::new(),
        })?;

        if self.lock().auto_respond {
            self.set_value(peripheral_id, characteristic, data.to_vec());
        }
        Ok(())
    }

    fn set_notify(
        &self,
        peripheral_id: &str,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), StackError> {
        let request = NativeRequest::SetNotify {
            peripheral_id: peripheral_id.to_string(),
            service,
            characteristic,
            enabled,
        };
        self.submit(request, |state| {
            let mut events = vec![NativeEvent::NotificationStateChanged {
                peripheral_id: peripheral_id.to_string(),
                service,
                characteristic,
                enabled,
                result: Ok(()),
            }];
            // Push the current value right away, like a sensor with a fresh sample
            if let Some(value) = state
                .values
                .get(&(peripheral_id.to_string(), characteristic))
                .filter(|_| enabled)
            {
                events.push(NativeEvent::ValueChanged {
                    peripheral_id: peripheral_id.to_string(),
                    service,
                    characteristic,
                    value: value.clone(),
                });
            }
            events
        })
    }
}

pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub const BODY_SENSOR_LOCATION: Uuid = Uuid::from_u128(0x00002a38_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_CONTROL_POINT: Uuid =
    Uuid::from_u128(0x00002a39_0000_1000_8000_00805f9b34fb);

/// Standard heart rate service: a notifying measurement, a readable sensor
/// location and a writable control point
pub fn heart_rate_service() -> Service {
    Service::new(
        HEART_RATE_SERVICE,
        vec![
            Characteristic::new(HEART_RATE_MEASUREMENT, CharacteristicProperties::NOTIFY),
            Characteristic::new(BODY_SENSOR_LOCATION, CharacteristicProperties::READ),
            Characteristic::new(
                HEART_RATE_CONTROL_POINT,
                CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::gatt::parse_uuid;

    #[test]
    fn test_sample_uuids_match_short_forms() {
        assert_eq!(parse_uuid("180d"), Some(HEART_RATE_SERVICE));
        assert_eq!(parse_uuid("2A37"), Some(HEART_RATE_MEASUREMENT));
    }

    #[tokio::test]
    async fn test_discovery_respects_filters() {
        let (stack, mut events) = SimulatedStack::with_sample_devices();
        // adapter power-on
        assert!(matches!(
            events.recv().await,
            Some(NativeEvent::AdapterStateChanged(AdapterState::On))
        ));

        stack
            .start_discovery(Some(&[HEART_RATE_SERVICE][..]))
            .unwrap();
        match events.recv().await {
            Some(NativeEvent::Discovered(p)) => {
                assert_eq!(p.name, "Polar H10");
                assert!(p.services.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refusal_is_recorded() {
        let (stack, _events) = SimulatedStack::new();
        stack.refuse_requests("adapter busy");
        assert_eq!(stack.connect("A"), Err("adapter busy".to_string()));
        assert_eq!(stack.requests(), vec![NativeRequest::Connect("A".into())]);
        assert_eq!(
            stack.next_request().await,
            Some(NativeRequest::Connect("A".into()))
        );

        stack.accept_requests();
        assert!(stack.stop_discovery().is_ok());
    }

    #[tokio::test]
    async fn test_auto_respond_read() {
        let (stack, mut events) = SimulatedStack::new();
        stack.set_auto_respond(true);
        stack.set_value("A", BODY_SENSOR_LOCATION, vec![0x02]);
        stack
            .read("A", HEART_RATE_SERVICE, BODY_SENSOR_LOCATION)
            .unwrap();

        match events.recv().await {
            Some(NativeEvent::ReadComplete { result, .. }) => assert_eq!(result, Ok(vec![0x02])),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
