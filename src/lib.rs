//! BLE central session core
//!
//! Drives a platform BLE stack in the central role: scan for peripherals,
//! connect, and read, write or subscribe to their characteristics. The
//! platform engine plugs in through [`NativeStack`]; [`SimulatedStack`]
//! stands in for it in tests and the demo.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{CentralError, Result};
pub use domain::models::{
    AdapterState, AdvertisementData, Characteristic, CharacteristicProperties,
    CharacteristicRef, ConnectedInfo, ConnectionState, DisconnectedInfo, OperationKind,
    Peripheral, ReadResult, ScanOptions, Service,
};
pub use domain::settings::{CentralSettings, LogSettings, SettingsService};
pub use infrastructure::bluetooth::codec::WriteValue;
pub use infrastructure::bluetooth::events::CentralNotice;
pub use infrastructure::bluetooth::permissions::{AlwaysGranted, Permissions};
pub use infrastructure::bluetooth::simulated::{NativeRequest, SimulatedStack};
pub use infrastructure::bluetooth::stack::{
    BondState, EventReceiver, EventSink, NativeEvent, NativeStack, StackError, WriteKind,
};
pub use infrastructure::bluetooth::Central;
