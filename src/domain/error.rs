use crate::domain::models::OperationKind;
use thiserror::Error;

/// Failures surfaced by the central session core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CentralError {
    #[error("Bluetooth is not enabled")]
    AdapterDisabled,

    #[error("no {0} was passed")]
    MissingParameter(&'static str),

    #[error("could not find peripheral with id {0}")]
    PeripheralNotFound(String),

    #[error("could not find service {service} on peripheral {peripheral}")]
    ServiceNotFound { peripheral: String, service: String },

    #[error("could not find characteristic {characteristic} on service {service} on peripheral {peripheral}")]
    CharacteristicNotFound {
        peripheral: String,
        service: String,
        characteristic: String,
    },

    #[error("peripheral {0} is not connected")]
    NotConnected(String),

    #[error("peripheral {0} is still disconnecting")]
    StillDisconnecting(String),

    #[error("a value to write must be provided")]
    EmptyValue,

    #[error("value cannot be encoded: {0}")]
    EncodingError(String),

    #[error("peripheral {0} disconnected before the operation completed")]
    Disconnected(String),

    #[error("native stack reported an error: {0}")]
    NativeOperationFailed(String),

    #[error("Bluetooth permission was not granted")]
    PermissionDenied,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("a {kind} is already in flight on peripheral {peripheral}")]
    Busy {
        peripheral: String,
        kind: OperationKind,
    },
}

pub type Result<T> = std::result::Result<T, CentralError>;
