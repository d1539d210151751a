//! BLE Connection Module
//!
//! Connect and disconnect requests, and the link-state events that follow
//! them. A connect future settles once the stack accepts the request; the
//! link itself is reported later through the caller's handlers.

use crate::domain::error::{CentralError, Result};
use crate::domain::models::{
    ConnectedHandler, ConnectedInfo, ConnectionState, DisconnectedHandler, DisconnectedInfo,
    Peripheral, Service,
};
use crate::infrastructure::bluetooth::{
    events::CentralNotice, permissions::ensure_granted, service::Central, stack::NativeStack,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handlers registered by the last `connect` call for a peripheral
pub(crate) struct ConnectionCallbacks {
    pub(crate) on_connected: ConnectedHandler,
    pub(crate) on_disconnected: DisconnectedHandler,
}

impl<S: NativeStack> Central<S> {
    /// Connect to a peripheral by identifier
    ///
    /// Connecting an already-connected peripheral issues no native request:
    /// the handlers are replaced and `on_connected` fires again with the
    /// current snapshot. A peripheral whose disconnect is still in flight is
    /// refused until its teardown completes.
    pub async fn connect<C, D>(&self, id: &str, on_connected: C, on_disconnected: D) -> Result<()>
    where
        C: Fn(ConnectedInfo) + Send + Sync + 'static,
        D: Fn(DisconnectedInfo) + Send + Sync + 'static,
    {
        self.check_identifier(id)?;
        ensure_granted(self.permissions())?;

        let callbacks = ConnectionCallbacks {
            on_connected: Arc::new(on_connected),
            on_disconnected: Arc::new(on_disconnected),
        };

        let mut state = self.lock();

        if let Some(peripheral) = state.registry.get_connected(id) {
            if peripheral.state != ConnectionState::Connected {
                info!("{} is still disconnecting, refusing to connect", id);
                return Err(CentralError::StillDisconnecting(id.to_string()));
            }
            info!("{} is already connected, replacing its handlers", id);
            let snapshot = ConnectedInfo::from(peripheral);
            let handler = callbacks.on_connected.clone();
            state.callbacks.insert(id.to_string(), callbacks);
            drop(state);
            handler(snapshot);
            return Ok(());
        }

        let peripheral = state
            .registry
            .find_discovered(id, |id| self.stack().retrieve_peripheral(id))
            .ok_or_else(|| CentralError::PeripheralNotFound(id.to_string()))?;

        // Known to the platform but not seen in this session
        if !state.registry.contains(id) {
            debug!("Registering {} from platform lookup", id);
            state.registry.register(peripheral);
        }

        info!("Connecting to {}", id);
        state.callbacks.insert(id.to_string(), callbacks);
        state
            .registry
            .update(id, |p| p.state = ConnectionState::Connecting);

        if let Err(e) = self.stack().connect(id) {
            state.callbacks.remove(id);
            state
                .registry
                .update(id, |p| p.state = ConnectionState::Disconnected);
            return Err(self.native_failure("Connect", Some(id), e));
        }
        Ok(())
    }

    /// Drop the link to a peripheral. A peripheral that is already
    /// disconnected settles without a native request.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        self.check_identifier(id)?;

        let mut state = self.lock();
        let peripheral = state
            .registry
            .find(id, |id| self.stack().retrieve_peripheral(id))
            .ok_or_else(|| CentralError::PeripheralNotFound(id.to_string()))?;

        if peripheral.state == ConnectionState::Disconnected {
            debug!("{} is already disconnected", id);
            return Ok(());
        }

        info!("Disconnecting from {}", id);
        state
            .registry
            .update(id, |p| p.state = ConnectionState::Disconnecting);

        if let Err(e) = self.stack().cancel_connection(id) {
            state.registry.update(id, |p| p.state = peripheral.state);
            return Err(self.native_failure("Disconnect", Some(id), e));
        }
        Ok(())
    }

    pub async fn is_connected(&self, id: &str) -> Result<bool> {
        self.check_identifier(id)?;

        self.lock()
            .registry
            .find(id, |id| self.stack().retrieve_peripheral(id))
            .map(|p| p.is_connected())
            .ok_or_else(|| CentralError::PeripheralNotFound(id.to_string()))
    }

    fn check_identifier(&self, id: &str) -> Result<()> {
        if !self.is_enabled() {
            return Err(CentralError::AdapterDisabled);
        }
        if id.is_empty() {
            return Err(CentralError::MissingParameter("peripheral identifier"));
        }
        Ok(())
    }

    pub(crate) fn on_connected(&self, id: String, services: Vec<Service>) {
        let (info, handler) = {
            let mut state = self.lock();
            if !state.registry.contains(&id) {
                let peripheral = self
                    .stack()
                    .retrieve_peripheral(&id)
                    .unwrap_or_else(|| Peripheral::new(id.clone(), "", 0));
                state.registry.register(peripheral);
            }
            state.registry.update(&id, |p| p.services = services);

            let Some(info) = state.registry.promote(&id).map(ConnectedInfo::from) else {
                return;
            };
            let handler = state.callbacks.get(&id).map(|c| c.on_connected.clone());
            (info, handler)
        };

        info!(
            "Connected to {} with {} services",
            info.id,
            info.services.len()
        );
        self.publish(CentralNotice::PeripheralConnected(info.clone()));
        match handler {
            Some(handler) => handler(info),
            None => debug!("{} connected without a pending connect call", id),
        }
    }

    pub(crate) fn on_connect_failed(&self, id: String, reason: String) {
        warn!("Connection to {} failed: {}", id, reason);
        let (info, handler) = self.tear_down(&id);
        self.publish(CentralNotice::Error {
            peripheral_id: Some(id),
            message: format!("Connect failed: {}", reason),
        });
        if let Some(handler) = handler {
            handler(info);
        }
    }

    pub(crate) fn on_disconnected(&self, id: String) {
        info!("Disconnected from {}", id);
        let (info, handler) = self.tear_down(&id);
        self.publish(CentralNotice::AclDisconnected(info.clone()));
        if let Some(handler) = handler {
            handler(info);
        }
    }

    /// Demote the peripheral and release everything tied to its link
    fn tear_down(&self, id: &str) -> (DisconnectedInfo, Option<DisconnectedHandler>) {
        let (info, handler, pending) = {
            let mut state = self.lock();
            let name = state
                .registry
                .demote(id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let handler = state.callbacks.remove(id).map(|c| c.on_disconnected);
            let pending = state.take_pending(id);
            state.subscriptions.retain(|key, _| key.peripheral_id != id);

            let info = DisconnectedInfo {
                id: id.to_string(),
                name,
            };
            (info, handler, pending)
        };

        for operation in pending {
            operation.fail(CentralError::Disconnected(id.to_string()));
        }
        (info, handler)
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::error::CentralError;
    use crate::domain::models::{
        AdapterState, ConnectedInfo, ConnectionState, DisconnectedInfo, Peripheral,
    };
    use crate::domain::settings::CentralSettings;
    use crate::infrastructure::bluetooth::permissions::Permissions;
    use crate::infrastructure::bluetooth::service::Central;
    use crate::infrastructure::bluetooth::simulated::{
        heart_rate_service, NativeRequest, SimulatedStack,
    };
    use crate::infrastructure::bluetooth::stack::NativeEvent;
    use tokio::sync::mpsc;

    fn central() -> (Central<SimulatedStack>, SimulatedStack) {
        let (stack, events) = SimulatedStack::new();
        stack.set_adapter_state(AdapterState::On);
        stack.add_device(Peripheral::new("A", "Sensor", -60));
        let central = Central::new(stack.clone(), events, CentralSettings::default());
        (central, stack)
    }

    async fn discover(central: &Central<SimulatedStack>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        central
            .start_scan(Default::default(), move |p| {
                let _ = tx.send(p);
            })
            .await
            .unwrap();
        rx.recv().await.unwrap();
    }

    fn handlers() -> (
        impl Fn(ConnectedInfo) + Send + Sync + 'static,
        impl Fn(DisconnectedInfo) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<ConnectedInfo>,
        mpsc::UnboundedReceiver<DisconnectedInfo>,
    ) {
        let (up_tx, up_rx) = mpsc::unbounded_channel();
        let (down_tx, down_rx) = mpsc::unbounded_channel();
        (
            move |info| {
                let _ = up_tx.send(info);
            },
            move |info| {
                let _ = down_tx.send(info);
            },
            up_rx,
            down_rx,
        )
    }

    #[tokio::test]
    async fn test_connect_validation() {
        let (stack, events) = SimulatedStack::new();
        let central = Central::new(stack.clone(), events, CentralSettings::default());
        let err = central.connect("A", |_| {}, |_| {}).await.unwrap_err();
        assert_eq!(err, CentralError::AdapterDisabled);

        stack.set_adapter_state(AdapterState::On);
        let err = central.connect("", |_| {}, |_| {}).await.unwrap_err();
        assert_eq!(err, CentralError::MissingParameter("peripheral identifier"));
    }

    #[tokio::test]
    async fn test_connect_unknown_peripheral() {
        let (central, stack) = central();
        let err = central.connect("X", |_| {}, |_| {}).await.unwrap_err();
        assert_eq!(err, CentralError::PeripheralNotFound("X".to_string()));
        assert_eq!(
            central.disconnect("X").await.unwrap_err(),
            CentralError::PeripheralNotFound("X".to_string())
        );
        assert!(central.is_connected("X").await.is_err());
        assert!(!stack
            .requests()
            .iter()
            .any(|r| matches!(r, NativeRequest::Connect(_))));
    }

    #[tokio::test]
    async fn test_connect_then_link_up() {
        let (central, stack) = central();
        discover(&central).await;
        let mut notices = central.subscribe_events();
        let (on_up, on_down, mut up, _down) = handlers();

        central.connect("A", on_up, on_down).await.unwrap();
        assert_eq!(stack.requests().last(), Some(&NativeRequest::Connect("A".into())));
        assert!(!central.is_connected("A").await.unwrap());

        stack.emit(NativeEvent::Connected {
            peripheral_id: "A".to_string(),
            services: vec![heart_rate_service()],
        });
        let info = up.recv().await.unwrap();
        assert_eq!(info.name, "Sensor");
        assert_eq!(info.services, vec![heart_rate_service()]);
        assert!(central.is_connected("A").await.unwrap());

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.name(), "peripheral_connected_event");
    }

    #[tokio::test]
    async fn test_connect_known_to_platform_only() {
        let (central, stack) = central();
        stack.add_known_peripheral(Peripheral::new("K", "Remembered", 0));
        let (on_up, on_down, mut up, _down) = handlers();

        central.connect("K", on_up, on_down).await.unwrap();
        stack.emit(NativeEvent::Connected {
            peripheral_id: "K".to_string(),
            services: vec![],
        });
        assert_eq!(up.recv().await.unwrap().name, "Remembered");
        assert!(central.is_connected("K").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_again_is_idempotent() {
        let (central, stack) = central();
        discover(&central).await;
        central.connect("A", |_| {}, |_| {}).await.unwrap();
        stack.emit(NativeEvent::Connected {
            peripheral_id: "A".to_string(),
            services: vec![heart_rate_service()],
        });
        while !central.is_connected("A").await.unwrap() {
            tokio::task::yield_now().await;
        }
        let requests_before = stack.requests().len();

        let (on_up, on_down, mut up, mut down) = handlers();
        central.connect("A", on_up, on_down).await.unwrap();
        assert_eq!(up.recv().await.unwrap().services.len(), 1);
        assert_eq!(stack.requests().len(), requests_before);

        // the replacement handlers are the ones that fire on teardown
        stack.emit(NativeEvent::Disconnected {
            peripheral_id: "A".to_string(),
        });
        assert_eq!(down.recv().await.unwrap().id, "A");
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let (central, stack) = central();
        discover(&central).await;
        stack.refuse_requests("radio busy");

        let err = central.connect("A", |_| {}, |_| {}).await.unwrap_err();
        assert_eq!(err, CentralError::NativeOperationFailed("radio busy".into()));
        // not left half-connecting
        assert!(!central.is_connected("A").await.unwrap());
        assert!(central.disconnect("A").await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_lifecycle() {
        let (central, stack) = central();
        discover(&central).await;

        // already disconnected: nothing sent
        central.disconnect("A").await.unwrap();
        assert!(!stack
            .requests()
            .contains(&NativeRequest::CancelConnection("A".into())));

        let (on_up, on_down, mut up, mut down) = handlers();
        central.connect("A", on_up, on_down).await.unwrap();
        stack.emit(NativeEvent::Connected {
            peripheral_id: "A".to_string(),
            services: vec![heart_rate_service()],
        });
        up.recv().await.unwrap();

        let mut notices = central.subscribe_events();
        central.disconnect("A").await.unwrap();
        assert_eq!(
            stack.requests().last(),
            Some(&NativeRequest::CancelConnection("A".into()))
        );

        stack.emit(NativeEvent::Disconnected {
            peripheral_id: "A".to_string(),
        });
        let info = down.recv().await.unwrap();
        assert_eq!(info.name, "Sensor");
        assert_eq!(
            notices.recv().await.unwrap().name(),
            "device_acl_disconnected_event"
        );
        assert!(!central.is_connected("A").await.unwrap());
        assert!(central.find_peripheral("A").unwrap().services.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failed_event() {
        let (central, stack) = central();
        discover(&central).await;
        let mut notices = central.subscribe_events();
        let (on_up, on_down, _up, mut down) = handlers();

        central.connect("A", on_up, on_down).await.unwrap();
        stack.emit(NativeEvent::ConnectFailed {
            peripheral_id: "A".to_string(),
            reason: "timeout".to_string(),
        });

        assert_eq!(down.recv().await.unwrap().id, "A");
        assert_eq!(notices.recv().await.unwrap().name(), "error_event");
        assert!(!central.is_connected("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_while_disconnecting() {
        let (central, stack) = central();
        discover(&central).await;
        let (on_up, on_down, mut up, _down) = handlers();
        central.connect("A", on_up, on_down).await.unwrap();
        stack.emit(NativeEvent::Connected {
            peripheral_id: "A".to_string(),
            services: vec![heart_rate_service()],
        });
        up.recv().await.unwrap();
        central.disconnect("A").await.unwrap();
        let requests_before = stack.requests().len();

        let (on_up, on_down, mut up, mut down) = handlers();
        let err = central.connect("A", on_up, on_down).await.unwrap_err();
        assert_eq!(err, CentralError::StillDisconnecting("A".to_string()));
        assert_eq!(stack.requests().len(), requests_before);
        assert!(up.try_recv().is_err());

        // once torn down, a fresh connect goes to the stack
        stack.emit(NativeEvent::Disconnected {
            peripheral_id: "A".to_string(),
        });
        while central.find_peripheral("A").unwrap().state != ConnectionState::Disconnected {
            tokio::task::yield_now().await;
        }
        assert!(down.try_recv().is_err());

        let (on_up, on_down, _up, _down) = handlers();
        central.connect("A", on_up, on_down).await.unwrap();
        assert_eq!(stack.requests().last(), Some(&NativeRequest::Connect("A".into())));
    }

    struct Denied;

    impl Permissions for Denied {
        fn is_granted(&self) -> bool {
            false
        }

        fn request(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_connect_needs_permission() {
        let (stack, events) = SimulatedStack::new();
        stack.set_adapter_state(AdapterState::On);
        stack.add_known_peripheral(Peripheral::new("K", "Remembered", 0));
        let central =
            Central::with_permissions(stack.clone(), events, CentralSettings::default(), Denied);

        let err = central.connect("K", |_| {}, |_| {}).await.unwrap_err();
        assert_eq!(err, CentralError::PermissionDenied);

        let err = central
            .start_scan(Default::default(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, CentralError::PermissionDenied);
        assert!(stack.requests().is_empty());
    }
}
