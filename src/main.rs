use anyhow::{Context, Result};
use bluetooth_central::infrastructure::bluetooth::simulated::{
    BODY_SENSOR_LOCATION, HEART_RATE_CONTROL_POINT, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE,
};
use bluetooth_central::infrastructure::logging::init_logger;
use bluetooth_central::{
    Central, CharacteristicRef, NativeEvent, ScanOptions, SettingsService, SimulatedStack,
    WriteValue,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Walk one peripheral through scan, connect, read, write and notify against
/// the simulated stack
#[tokio::main]
async fn main() -> Result<()> {
    let mut settings_service = SettingsService::new()?;

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Bluetooth central demo");

    let (stack, events) = SimulatedStack::with_sample_devices();
    let central = Central::new(stack.clone(), events, settings_service.get().clone());

    let mut notices = central.subscribe_events();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            debug!("{}: {:?}", notice.name(), notice);
        }
    });

    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let options = ScanOptions {
        seconds: Some(1),
        ..Default::default()
    };
    central
        .start_scan(options, move |peripheral| {
            info!("Found {} ({} dBm)", peripheral.name, peripheral.rssi);
            let _ = found_tx.send(peripheral);
        })
        .await?;

    let mut monitor = None;
    while let Ok(peripheral) = found_rx.try_recv() {
        let advertises_heart_rate = peripheral
            .advertisement
            .as_ref()
            .is_some_and(|ad| ad.service_uuids.contains(&HEART_RATE_SERVICE));
        if advertises_heart_rate {
            monitor = Some(peripheral);
        }
    }
    let monitor = monitor.context("no heart rate monitor found")?;
    let id = monitor.id.clone();

    let (up_tx, mut up_rx) = mpsc::unbounded_channel();
    let (down_tx, mut down_rx) = mpsc::unbounded_channel();
    central
        .connect(
            &id,
            move |info| {
                let _ = up_tx.send(info);
            },
            move |info| {
                let _ = down_tx.send(info);
            },
        )
        .await?;
    let connected = up_rx.recv().await.context("connection never came up")?;
    info!(
        "Connected to {} with {} services",
        connected.name,
        connected.services.len()
    );

    if let Err(e) = settings_service.add_known_peripheral(&id) {
        warn!("Could not remember {}: {}", id, e);
    }

    let target = |characteristic: Uuid| {
        CharacteristicRef::new(
            id.as_str(),
            HEART_RATE_SERVICE.to_string(),
            characteristic.to_string(),
        )
    };

    let location = central.read(&target(BODY_SENSOR_LOCATION)).await?;
    info!("Body sensor location: {:?}", location.value);

    let measurement = target(HEART_RATE_MEASUREMENT);
    central
        .start_notifying(&measurement, |result| match result.value.get(1) {
            Some(bpm) => info!("Heart rate: {} bpm", bpm),
            None => warn!("Short heart rate sample: {:?}", result.raw),
        })
        .await?;

    for bpm in [74u8, 77, 75] {
        tokio::time::sleep(Duration::from_millis(250)).await;
        stack.emit(NativeEvent::ValueChanged {
            peripheral_id: id.clone(),
            service: HEART_RATE_SERVICE,
            characteristic: HEART_RATE_MEASUREMENT,
            value: vec![0x00, bpm],
        });
    }

    let control_point = target(HEART_RATE_CONTROL_POINT);
    central
        .write(&control_point, Some(WriteValue::Bytes(vec![0x01])), None)
        .await?;
    info!("Energy expended counter reset");
    central
        .write_without_response(&control_point, Some("reset".into()), Some("utf-8"))
        .await?;

    central.stop_notifying(&measurement).await?;
    central.disconnect(&id).await?;
    let gone = down_rx.recv().await.context("disconnect never completed")?;
    info!("Disconnected from {}", gone.name);

    Ok(())
}
