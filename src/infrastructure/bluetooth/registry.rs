//! Device Registry
//!
//! Peripherals seen during scanning and peripherals with a live link, keyed
//! by identifier. An identifier lives in at most one of the two sets.

use crate::domain::models::{ConnectionState, Peripheral};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Registry {
    discovered: HashMap<String, Peripheral>,
    connected: HashMap<String, Peripheral>,
}

impl Registry {
    /// Connected set, then discovered set, then the platform lookup
    pub fn find<F>(&self, id: &str, lookup: F) -> Option<Peripheral>
    where
        F: FnOnce(&str) -> Option<Peripheral>,
    {
        self.connected
            .get(id)
            .or_else(|| self.discovered.get(id))
            .cloned()
            .or_else(|| lookup(id))
    }

    /// Discovered set, then the platform lookup. The connected set is skipped.
    pub fn find_discovered<F>(&self, id: &str, lookup: F) -> Option<Peripheral>
    where
        F: FnOnce(&str) -> Option<Peripheral>,
    {
        self.discovered.get(id).cloned().or_else(|| lookup(id))
    }

    pub fn get_connected(&self, id: &str) -> Option<&Peripheral> {
        self.connected.get(id)
    }

    /// Insert into the discovered set. First sighting wins; returns whether
    /// the peripheral was new.
    pub fn register(&mut self, peripheral: Peripheral) -> bool {
        if self.contains(&peripheral.id) {
            return false;
        }
        self.discovered.insert(peripheral.id.clone(), peripheral);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connected.contains_key(id) || self.discovered.contains_key(id)
    }

    /// Apply `f` to the cached record wherever it lives
    pub fn update<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Peripheral),
    {
        match self
            .connected
            .get_mut(id)
            .or_else(|| self.discovered.get_mut(id))
        {
            Some(peripheral) => {
                f(peripheral);
                true
            }
            None => false,
        }
    }

    /// Move a peripheral into the connected set and mark it connected
    pub fn promote(&mut self, id: &str) -> Option<&Peripheral> {
        if let Some(mut peripheral) = self.discovered.remove(id) {
            peripheral.state = ConnectionState::Connected;
            self.connected.insert(id.to_string(), peripheral);
        } else if let Some(peripheral) = self.connected.get_mut(id) {
            peripheral.state = ConnectionState::Connected;
        }
        self.connected.get(id)
    }

    /// Move a peripheral back to the discovered set, dropping its GATT table
    pub fn demote(&mut self, id: &str) -> Option<&Peripheral> {
        let mut peripheral = self
            .connected
            .remove(id)
            .or_else(|| self.discovered.remove(id))?;
        peripheral.state = ConnectionState::Disconnected;
        peripheral.services.clear();
        self.discovered.insert(id.to_string(), peripheral);
        self.discovered.get(id)
    }

    /// Forget everything discovered. Connected peripherals, and ones with a
    /// connect in flight, are kept.
    pub fn clear_discovered(&mut self) {
        self.discovered
            .retain(|_, p| p.state != ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(ids: &[&str]) -> Registry {
        let mut registry = Registry::default();
        for id in ids {
            registry.register(Peripheral::new(*id, "dev", -70));
        }
        registry
    }

    #[test]
    fn test_first_seen_wins() {
        let mut registry = Registry::default();
        assert!(registry.register(Peripheral::new("A", "first", -70)));
        assert!(!registry.register(Peripheral::new("A", "second", -40)));
        assert_eq!(registry.find("A", |_| None).unwrap().name, "first");
    }

    #[test]
    fn test_find_falls_back_to_platform() {
        let registry = Registry::default();
        assert!(registry.find("X", |_| None).is_none());

        let found = registry.find("X", |id| Some(Peripheral::new(id, "known", 0)));
        assert_eq!(found.unwrap().name, "known");
    }

    #[test]
    fn test_find_discovered_skips_connected() {
        let mut registry = registry_with(&["A"]);
        registry.promote("A");
        assert!(registry.find_discovered("A", |_| None).is_none());
        assert!(registry.find("A", |_| None).is_some());
    }

    #[test]
    fn test_promote_and_demote() {
        let mut registry = registry_with(&["A"]);
        registry.update("A", |p| {
            p.services = vec![crate::domain::models::Service::new(uuid::Uuid::nil(), vec![])]
        });

        let promoted = registry.promote("A").unwrap();
        assert_eq!(promoted.state, ConnectionState::Connected);
        assert!(registry.get_connected("A").is_some());
        assert!(registry.find_discovered("A", |_| None).is_none());

        let demoted = registry.demote("A").unwrap();
        assert_eq!(demoted.state, ConnectionState::Disconnected);
        assert!(demoted.services.is_empty());
        assert!(registry.get_connected("A").is_none());
        assert!(registry.contains("A"));
    }

    #[test]
    fn test_clear_keeps_connected() {
        let mut registry = registry_with(&["A", "B", "C"]);
        registry.promote("A");
        registry.update("C", |p| p.state = ConnectionState::Connecting);
        registry.clear_discovered();
        assert!(registry.contains("A"));
        assert!(!registry.contains("B"));
        assert!(registry.contains("C"));
    }
}
