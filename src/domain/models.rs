use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Power state of the local radio, as reported by the native stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdapterState {
    Unknown,
    Off,
    PoweringOn,
    PoweringOff,
    On,
}

impl AdapterState {
    pub fn is_on(self) -> bool {
        self == AdapterState::On
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

bitflags! {
    /// Capability flags a characteristic advertises
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CharacteristicProperties: u16 {
        const BROADCAST = 0x0001;
        const READ = 0x0002;
        const WRITE_WITHOUT_RESPONSE = 0x0004;
        const WRITE = 0x0008;
        const NOTIFY = 0x0010;
        const INDICATE = 0x0020;
        const AUTHENTICATED_SIGNED_WRITES = 0x0040;
        const EXTENDED_PROPERTIES = 0x0080;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

impl Characteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self { uuid, properties }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, characteristics: Vec<Characteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}

/// Advertisement payload captured at discovery time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementData {
    pub manufacturer_id: Option<u16>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub local_name: Option<String>,
    #[serde(default)]
    pub service_uuids: Vec<Uuid>,
}

/// A remote device, either discovered during a scan or known to the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peripheral {
    pub id: String,
    pub name: String,
    pub rssi: i16,
    pub advertisement: Option<AdvertisementData>,
    pub state: ConnectionState,
    /// Populated once per connection, after service discovery
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Peripheral {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rssi,
            advertisement: None,
            state: ConnectionState::Disconnected,
            services: Vec::new(),
        }
    }

    pub fn with_advertisement(mut self, advertisement: AdvertisementData) -> Self {
        self.advertisement = Some(advertisement);
        self
    }

    pub fn with_services(mut self, services: Vec<Service>) -> Self {
        self.services = services;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Addresses one characteristic: the string triple every GATT operation takes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicRef {
    pub peripheral_id: String,
    pub service_id: String,
    pub characteristic_id: String,
}

impl CharacteristicRef {
    pub fn new(
        peripheral_id: impl Into<String>,
        service_id: impl Into<String>,
        characteristic_id: impl Into<String>,
    ) -> Self {
        Self {
            peripheral_id: peripheral_id.into(),
            service_id: service_id.into(),
            characteristic_id: characteristic_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResult {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
    pub raw: Vec<u8>,
}

/// Payload handed to the connected handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedInfo {
    pub id: String,
    pub name: String,
    pub state: ConnectionState,
    pub services: Vec<Service>,
    pub advertisement: Option<AdvertisementData>,
}

impl From<&Peripheral> for ConnectedInfo {
    fn from(peripheral: &Peripheral) -> Self {
        Self {
            id: peripheral.id.clone(),
            name: peripheral.name.clone(),
            state: peripheral.state,
            services: peripheral.services.clone(),
            advertisement: peripheral.advertisement.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectedInfo {
    pub id: String,
    pub name: String,
}

/// Scan parameters. No filters means an unfiltered scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Service identifiers to filter on
    pub filters: Vec<String>,
    /// Auto-stop after this many seconds
    pub seconds: Option<u64>,
    pub skip_permission_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    Subscribe,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
            Self::Subscribe => f.write_str("notify-subscribe"),
        }
    }
}

pub type DiscoveryHandler = Arc<dyn Fn(Peripheral) + Send + Sync>;
pub type ConnectedHandler = Arc<dyn Fn(ConnectedInfo) + Send + Sync>;
pub type DisconnectedHandler = Arc<dyn Fn(DisconnectedInfo) + Send + Sync>;
pub type NotifyHandler = Arc<dyn Fn(ReadResult) + Send + Sync>;
