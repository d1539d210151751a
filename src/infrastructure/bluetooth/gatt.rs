//! GATT Resolver
//!
//! Locates the peripheral, service and characteristic an operation targets,
//! checking each precondition in a fixed order.

use crate::domain::error::{CentralError, Result};
use crate::domain::models::{
    Characteristic, CharacteristicProperties, CharacteristicRef, ConnectionState, Peripheral,
    Service,
};
use crate::infrastructure::bluetooth::registry::Registry;
use tracing::debug;
use uuid::Uuid;

/// Bluetooth base UUID, used to widen 16 and 32-bit short identifiers
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Parse a service or characteristic identifier
///
/// Accepts full UUIDs in any case, with or without dashes, plus the 16-bit
/// (`"180d"`) and 32-bit short forms.
pub fn parse_uuid(uuid_str: &str) -> Option<Uuid> {
    let trimmed = uuid_str.trim();
    let widened = match trimmed.len() {
        4 => format!("0000{}{}", trimmed, BASE_UUID_SUFFIX),
        8 => format!("{}{}", trimmed, BASE_UUID_SUFFIX),
        _ => trimmed.to_string(),
    };
    Uuid::parse_str(&widened).ok()
}

/// What a successful resolution hands back
#[derive(Debug, Clone)]
pub struct GattTarget {
    pub peripheral: Peripheral,
    pub service: Service,
    pub characteristic: Characteristic,
}

fn find_service(peripheral: &Peripheral, uuid: Uuid) -> Option<&Service> {
    peripheral.services.iter().find(|s| s.uuid == uuid)
}

fn find_characteristic(
    service: &Service,
    uuid: Uuid,
    required: Option<CharacteristicProperties>,
) -> Option<&Characteristic> {
    service
        .characteristics
        .iter()
        .filter(|c| c.uuid == uuid)
        .find(|c| required.map_or(true, |flags| c.properties.contains(flags)))
}

/// Characteristic lookup with capability fallback
///
/// 1. identifier match carrying the required capability
/// 2. for notify, the same with indicate instead
/// 3. any characteristic with the identifier
pub fn select_characteristic(
    service: &Service,
    uuid: Uuid,
    required: Option<CharacteristicProperties>,
) -> Option<&Characteristic> {
    let Some(required) = required else {
        return find_characteristic(service, uuid, None);
    };

    find_characteristic(service, uuid, Some(required))
        .or_else(|| {
            if required == CharacteristicProperties::NOTIFY {
                find_characteristic(service, uuid, Some(CharacteristicProperties::INDICATE))
            } else {
                None
            }
        })
        .or_else(|| {
            let fallback = find_characteristic(service, uuid, None);
            if fallback.is_some() {
                debug!(
                    "Characteristic {} lacks {:?}, using it anyway",
                    uuid, required
                );
            }
            fallback
        })
}

/// Resolve `target`, failing at the first unmet precondition
pub fn resolve<F>(
    adapter_enabled: bool,
    registry: &Registry,
    lookup: F,
    target: &CharacteristicRef,
    required: Option<CharacteristicProperties>,
) -> Result<GattTarget>
where
    F: FnOnce(&str) -> Option<Peripheral>,
{
    if !adapter_enabled {
        return Err(CentralError::AdapterDisabled);
    }
    if target.peripheral_id.is_empty() {
        return Err(CentralError::MissingParameter("peripheral identifier"));
    }
    if target.service_id.is_empty() {
        return Err(CentralError::MissingParameter("service identifier"));
    }
    if target.characteristic_id.is_empty() {
        return Err(CentralError::MissingParameter("characteristic identifier"));
    }

    let peripheral = registry
        .find(&target.peripheral_id, lookup)
        .ok_or_else(|| CentralError::PeripheralNotFound(target.peripheral_id.clone()))?;

    if peripheral.state != ConnectionState::Connected {
        return Err(CentralError::NotConnected(target.peripheral_id.clone()));
    }

    let service = parse_uuid(&target.service_id)
        .and_then(|uuid| find_service(&peripheral, uuid))
        .cloned()
        .ok_or_else(|| CentralError::ServiceNotFound {
            peripheral: target.peripheral_id.clone(),
            service: target.service_id.clone(),
        })?;

    let characteristic = parse_uuid(&target.characteristic_id)
        .and_then(|uuid| select_characteristic(&service, uuid, required))
        .cloned()
        .ok_or_else(|| CentralError::CharacteristicNotFound {
            peripheral: target.peripheral_id.clone(),
            service: target.service_id.clone(),
            characteristic: target.characteristic_id.clone(),
        })?;

    Ok(GattTarget {
        peripheral,
        service,
        characteristic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEART_RATE: &str = "180d";
    const MEASUREMENT: &str = "2a37";

    fn uuid(s: &str) -> Uuid {
        parse_uuid(s).unwrap()
    }

    fn connected(services: Vec<Service>) -> Registry {
        let mut registry = Registry::default();
        let mut p = Peripheral::new("P1", "Strap", -50).with_services(services);
        p.state = ConnectionState::Connected;
        registry.register(p);
        registry.promote("P1");
        registry
    }

    fn target(service: &str, characteristic: &str) -> CharacteristicRef {
        CharacteristicRef::new("P1", service, characteristic)
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!(
            uuid(HEART_RATE).to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            uuid("4F63756C-7573-2054-6872-65656D6F7465"),
            uuid("4f63756c75732054687265656d6f7465")
        );
        assert!(parse_uuid("not-a-uuid").is_none());
    }

    #[test]
    fn test_validation_order() {
        let registry = connected(vec![]);
        let none = |_: &str| None;

        assert_eq!(
            resolve(false, &registry, none, &CharacteristicRef::default(), None).unwrap_err(),
            CentralError::AdapterDisabled
        );
        assert_eq!(
            resolve(true, &registry, none, &CharacteristicRef::default(), None).unwrap_err(),
            CentralError::MissingParameter("peripheral identifier")
        );
        assert_eq!(
            resolve(true, &registry, none, &CharacteristicRef::new("P1", "", "x"), None)
                .unwrap_err(),
            CentralError::MissingParameter("service identifier")
        );
        assert_eq!(
            resolve(true, &registry, none, &CharacteristicRef::new("P1", "x", ""), None)
                .unwrap_err(),
            CentralError::MissingParameter("characteristic identifier")
        );
        assert_eq!(
            resolve(true, &registry, none, &CharacteristicRef::new("P9", "x", "y"), None)
                .unwrap_err(),
            CentralError::PeripheralNotFound("P9".to_string())
        );
        assert!(matches!(
            resolve(true, &registry, none, &target(HEART_RATE, MEASUREMENT), None),
            Err(CentralError::ServiceNotFound { .. })
        ));
    }

    #[test]
    fn test_not_connected_before_service_lookup() {
        let mut registry = Registry::default();
        registry.register(Peripheral::new("P1", "Strap", -50));
        let err = resolve(true, &registry, |_| None, &target("nope", "nope"), None).unwrap_err();
        assert_eq!(err, CentralError::NotConnected("P1".to_string()));
    }

    #[test]
    fn test_missing_characteristic() {
        let registry = connected(vec![Service::new(uuid(HEART_RATE), vec![])]);
        let err = resolve(true, &registry, |_| None, &target(HEART_RATE, MEASUREMENT), None)
            .unwrap_err();
        assert!(matches!(err, CentralError::CharacteristicNotFound { .. }));
    }

    #[test]
    fn test_notify_fallback_order() {
        let plain = Characteristic::new(uuid(MEASUREMENT), CharacteristicProperties::READ);
        let indicate = Characteristic::new(uuid(MEASUREMENT), CharacteristicProperties::INDICATE);
        let notify = Characteristic::new(uuid(MEASUREMENT), CharacteristicProperties::NOTIFY);

        // exact capability wins over earlier entries
        let service = Service::new(
            uuid(HEART_RATE),
            vec![plain.clone(), indicate.clone(), notify.clone()],
        );
        let found = select_characteristic(
            &service,
            uuid(MEASUREMENT),
            Some(CharacteristicProperties::NOTIFY),
        );
        assert_eq!(found, Some(&notify));

        // indicate substitutes for notify
        let service = Service::new(uuid(HEART_RATE), vec![plain.clone(), indicate.clone()]);
        let found = select_characteristic(
            &service,
            uuid(MEASUREMENT),
            Some(CharacteristicProperties::NOTIFY),
        );
        assert_eq!(found, Some(&indicate));

        // anything with the identifier as a last resort
        let service = Service::new(uuid(HEART_RATE), vec![plain.clone()]);
        let found = select_characteristic(
            &service,
            uuid(MEASUREMENT),
            Some(CharacteristicProperties::NOTIFY),
        );
        assert_eq!(found, Some(&plain));
    }

    #[test]
    fn test_indicate_substitution_only_for_notify() {
        let indicate = Characteristic::new(uuid(MEASUREMENT), CharacteristicProperties::INDICATE);
        let read = Characteristic::new(uuid(MEASUREMENT), CharacteristicProperties::READ);
        let service = Service::new(uuid(HEART_RATE), vec![indicate.clone(), read.clone()]);

        let found =
            select_characteristic(&service, uuid(MEASUREMENT), Some(CharacteristicProperties::READ));
        assert_eq!(found, Some(&read));

        let found = select_characteristic(
            &service,
            uuid(MEASUREMENT),
            Some(CharacteristicProperties::WRITE),
        );
        assert_eq!(found, Some(&indicate));
    }

    #[test]
    fn test_resolves_with_short_and_long_ids() {
        let c = Characteristic::new(uuid(MEASUREMENT), CharacteristicProperties::NOTIFY);
        let registry = connected(vec![Service::new(uuid(HEART_RATE), vec![c.clone()])]);
        let resolved = resolve(
            true,
            &registry,
            |_| None,
            &target(
                "0000180D-0000-1000-8000-00805F9B34FB",
                MEASUREMENT,
            ),
            Some(CharacteristicProperties::NOTIFY),
        )
        .unwrap();
        assert_eq!(resolved.characteristic, c);
        assert_eq!(resolved.peripheral.id, "P1");
    }
}
