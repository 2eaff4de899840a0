//! Simulated radio for the demo binary.
//!
//! Responds to every [`Central`] command with the scripted happy-path event
//! and, once subscribed, feeds measurement packets through a ramp, a stable
//! plateau, an invalidation marker and a disconnect, so the whole lifecycle
//! including recovery is exercised without hardware.

use crate::central::{Central, CentralEvent, CentralEventChannel, Payload, MAX_PACKET_LEN};
use crate::types::{AdapterPowerState, CharacteristicHandle, PeripheralInfo, ServiceHandle};
use embassy_time::{Duration, Timer};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const SIM_PERIPHERAL_ID: &str = "F0:0D:CA:FE:00:01";
pub const SIM_PERIPHERAL_NAME: &str = "SIM-SCALE";

const SIM_SERVICE: ServiceHandle = ServiceHandle(0x0010);
const SIM_CHARACTERISTIC: CharacteristicHandle = CharacteristicHandle(0x0012);

pub struct SimulatedCentral {
    events: Arc<CentralEventChannel>,
    subscribed: Arc<AtomicBool>,
}

impl SimulatedCentral {
    pub fn new(events: Arc<CentralEventChannel>) -> Self {
        Self {
            events,
            subscribed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with [`run_notifier`]; true while a subscription is live.
    pub fn subscribed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.subscribed)
    }

    fn push(&self, event: CentralEvent) {
        if self.events.try_send(event).is_err() {
            warn!("Simulated event dropped, channel full");
        }
    }
}

impl Central for SimulatedCentral {
    fn start_scan(&mut self, service: Uuid) {
        debug!("sim: scanning for {}", service);
        self.push(CentralEvent::PeripheralDiscovered(PeripheralInfo {
            id: SIM_PERIPHERAL_ID.to_string(),
            name: Some(SIM_PERIPHERAL_NAME.to_string()),
        }));
    }

    fn stop_scan(&mut self) {
        debug!("sim: scan stopped");
    }

    fn connect(&mut self, peripheral: &str) {
        self.push(CentralEvent::Connected {
            peripheral: peripheral.to_string(),
        });
    }

    fn cancel_connect(&mut self, peripheral: &str) {
        debug!("sim: connection to {} cancelled", peripheral);
        self.subscribed.store(false, Ordering::Relaxed);
    }

    fn discover_service(&mut self, peripheral: &str, _service: Uuid) {
        self.push(CentralEvent::ServiceDiscovered {
            peripheral: peripheral.to_string(),
            service: Some(SIM_SERVICE),
        });
    }

    fn discover_characteristic(
        &mut self,
        peripheral: &str,
        _service: ServiceHandle,
        _characteristic: Uuid,
    ) {
        self.push(CentralEvent::CharacteristicDiscovered {
            peripheral: peripheral.to_string(),
            characteristic: Some(SIM_CHARACTERISTIC),
        });
    }

    fn subscribe(&mut self, _peripheral: &str, _characteristic: CharacteristicHandle) {
        self.subscribed.store(true, Ordering::Relaxed);
    }
}

/// flags, two reserved bytes, raw weight.
fn measurement(flags: u16, raw: u16) -> Payload {
    const PACKET_LEN: usize = 6;
    const _: () = assert!(PACKET_LEN <= MAX_PACKET_LEN);
    let mut bytes = [0u8; PACKET_LEN];
    bytes[0..2].copy_from_slice(&flags.to_le_bytes());
    bytes[4..6].copy_from_slice(&raw.to_le_bytes());
    Payload::from_slice(&bytes).unwrap_or_default()
}

async fn send(events: &CentralEventChannel, value: Payload) {
    events
        .send(CentralEvent::ValueUpdated {
            peripheral: SIM_PERIPHERAL_ID.to_string(),
            characteristic: SIM_CHARACTERISTIC,
            value: Some(value),
        })
        .await;
}

/// Notification feeder: powers the adapter on, then per cycle ramps the
/// weight up, holds a stable plateau, invalidates the reading and drops the
/// connection so the link has to recover.
pub async fn run_notifier(events: Arc<CentralEventChannel>, subscribed: Arc<AtomicBool>) -> ! {
    Timer::after(Duration::from_millis(100)).await;
    events
        .send(CentralEvent::PowerChanged(AdapterPowerState::On))
        .await;

    loop {
        while !subscribed.load(Ordering::Relaxed) {
            Timer::after(Duration::from_millis(100)).await;
        }

        // Ramp towards 70.0 kg at SI resolution (raw 14000).
        for raw in (2000..=14000).step_by(2000) {
            send(&events, measurement(0x0400, raw as u16)).await;
            Timer::after(Duration::from_millis(400)).await;
        }

        // Plateau with the stabilized bit set.
        for _ in 0..5 {
            send(&events, measurement(0x2400, 14000)).await;
            Timer::after(Duration::from_millis(400)).await;
        }

        // Person steps off: reading invalidated, then the scale powers its
        // radio down and the link must rescan.
        send(&events, measurement(0x8000, 0)).await;
        Timer::after(Duration::from_millis(400)).await;
        events
            .send(CentralEvent::Disconnected {
                peripheral: SIM_PERIPHERAL_ID.to_string(),
            })
            .await;
        Timer::after(Duration::from_secs(2)).await;
    }
}
