//! Event Bus
//!
//! Process-wide state-change notifications, published by name.

use crate::domain::models::{AdapterState, ConnectedInfo, DisconnectedInfo, Peripheral};
use crate::infrastructure::bluetooth::stack::BondState;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum CentralNotice {
    AdapterStatus(AdapterState),
    AdapterEnabled(bool),
    DeviceDiscovered(Peripheral),
    PeripheralConnected(ConnectedInfo),
    AclDisconnected(DisconnectedInfo),
    BondStatusChanged {
        peripheral_id: String,
        state: BondState,
    },
    Error {
        peripheral_id: Option<String>,
        message: String,
    },
}

impl CentralNotice {
    /// Name the notice is published under
    pub fn name(&self) -> &'static str {
        match self {
            Self::AdapterStatus(_) => "bluetooth_status_event",
            Self::AdapterEnabled(_) => "bluetooth_enabled_event",
            Self::DeviceDiscovered(_) => "device_discovered_event",
            Self::PeripheralConnected(_) => "peripheral_connected_event",
            Self::AclDisconnected(_) => "device_acl_disconnected_event",
            Self::BondStatusChanged { .. } => "bond_status_change_event",
            Self::Error { .. } => "error_event",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CentralNotice>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<CentralNotice> {
        self.sender.subscribe()
    }

    /// Publish to whoever is listening. Having no listeners is fine.
    pub fn publish(&self, notice: CentralNotice) {
        tracing::trace!("Publishing {}", notice.name());
        let _ = self.sender.send(notice);
    }
}
