//! Native Stack Seam
//!
//! The platform BLE engine is opaque to the core. Requests go out through
//! [`NativeStack`]; completions and state changes come back as typed
//! [`NativeEvent`]s pushed into an [`EventSink`]. The stack holds the sink,
//! the core holds the stack, so there is no ownership cycle.

use crate::domain::models::{AdapterState, Peripheral, Service};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error text reported by the native stack for an otherwise valid request
pub type StackError = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// Primitives the platform BLE engine must expose.
///
/// Every method only submits a request and returns whether the stack accepted
/// it. Outcomes arrive later as events.
pub trait NativeStack: Send + Sync + 'static {
    fn adapter_state(&self) -> AdapterState;

    /// `None` scans unfiltered
    fn start_discovery(&self, services: Option<&[Uuid]>) -> Result<(), StackError>;
    fn stop_discovery(&self) -> Result<(), StackError>;

    /// Look up a peripheral the platform knows from an earlier session
    fn retrieve_peripheral(&self, id: &str) -> Option<Peripheral>;

    fn connect(&self, peripheral_id: &str) -> Result<(), StackError>;
    fn cancel_connection(&self, peripheral_id: &str) -> Result<(), StackError>;

    fn read(&self, peripheral_id: &str, service: Uuid, characteristic: Uuid)
        -> Result<(), StackError>;
    fn write(
        &self,
        peripheral_id: &str,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<(), StackError>;
    fn set_notify(
        &self,
        peripheral_id: &str,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), StackError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// Everything the native stack reports back to the core
#[derive(Debug, Clone)]
pub enum NativeEvent {
    AdapterStateChanged(AdapterState),
    Discovered(Peripheral),
    /// Link is up and the GATT table has been discovered
    Connected {
        peripheral_id: String,
        services: Vec<Service>,
    },
    ConnectFailed {
        peripheral_id: String,
        reason: StackError,
    },
    Disconnected {
        peripheral_id: String,
    },
    ReadComplete {
        peripheral_id: String,
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>, StackError>,
    },
    WriteComplete {
        peripheral_id: String,
        service: Uuid,
        characteristic: Uuid,
        result: Result<(), StackError>,
    },
    ValueChanged {
        peripheral_id: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    NotificationStateChanged {
        peripheral_id: String,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
        result: Result<(), StackError>,
    },
    BondStatusChanged {
        peripheral_id: String,
        state: BondState,
    },
}

/// Handle the native stack uses to report events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<NativeEvent>,
}

pub type EventReceiver = mpsc::UnboundedReceiver<NativeEvent>;

impl EventSink {
    /// Create a sink and the receiver the core drains
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Returns false once the core has shut down
    pub fn send(&self, event: NativeEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}
