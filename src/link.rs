//! Connection state machine.
//!
//! Owns the lifecycle against an unreliable radio link: adapter power,
//! scanning, connecting, service and characteristic discovery, subscription,
//! and recovery. Every failure downstream of "connected" routes through one
//! recovery path, a full reset and rescan - the scale readvertises quickly
//! and restarting discovery is cheaper than granular retries.

use crate::central::{Central, CentralEvent};
use crate::protocol::{
    bluetooth_uuid, decode_measurement, DecodePolicy, WEIGHT_MEASUREMENT_CHAR,
    WEIGHT_SCALE_SERVICE,
};
use crate::store::{ChangeChannel, ReadingStore};
use crate::types::{
    AdapterPowerState, CharacteristicHandle, ConnectionState, DeviceIdentity, PeripheralInfo,
    ServiceHandle, WeightReading,
};
use log::{debug, info, warn};
use std::sync::Arc;

pub struct ScaleLink<C: Central> {
    central: C,
    power: AdapterPowerState,
    state: ConnectionState,
    peripheral: Option<PeripheralInfo>,
    service: Option<ServiceHandle>,
    characteristic: Option<CharacteristicHandle>,
    store: ReadingStore,
    policy: DecodePolicy,
    started: bool,
}

impl<C: Central> ScaleLink<C> {
    pub fn new(central: C, policy: DecodePolicy, changes: Arc<ChangeChannel>) -> Self {
        Self {
            central,
            power: AdapterPowerState::Unknown,
            state: ConnectionState::Idle,
            peripheral: None,
            service: None,
            characteristic: None,
            store: ReadingStore::new(changes),
            policy,
            started: false,
        }
    }

    /// Begins operation. Scanning starts once the adapter reports `On`;
    /// calling again after that is a no-op.
    pub fn start(&mut self) {
        self.started = true;
        if self.power == AdapterPowerState::On && self.state == ConnectionState::Idle {
            self.reset();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reading(&self) -> Option<WeightReading> {
        self.store.reading()
    }

    /// User-visible status per the override/state precedence.
    pub fn status(&self) -> String {
        self.store.derived_status(
            self.state,
            self.peripheral.as_ref().and_then(|p| p.name.as_deref()),
        )
    }

    /// Identity of the bound scale, for tagging saved samples.
    pub fn device_identity(&self) -> Option<DeviceIdentity> {
        self.peripheral.as_ref().map(|p| DeviceIdentity {
            name: p.name.clone(),
            id: p.id.clone(),
        })
    }

    pub fn store_mut(&mut self) -> &mut ReadingStore {
        &mut self.store
    }

    /// Dispatches one radio event to its handler.
    pub fn handle_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::PowerChanged(power) => self.on_power_changed(power),
            CentralEvent::PeripheralDiscovered(info) => self.on_peripheral_discovered(info),
            CentralEvent::Connected { peripheral } => self.on_connected(&peripheral),
            CentralEvent::ConnectFailed { peripheral } => self.on_connect_failed(&peripheral),
            CentralEvent::Disconnected { peripheral } => self.on_disconnected(&peripheral),
            CentralEvent::ServiceDiscovered {
                peripheral,
                service,
            } => self.on_service_discovered(&peripheral, service),
            CentralEvent::CharacteristicDiscovered {
                peripheral,
                characteristic,
            } => self.on_characteristic_discovered(&peripheral, characteristic),
            CentralEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => self.on_value_updated(&peripheral, characteristic, value.as_deref()),
        }
    }

    pub fn on_power_changed(&mut self, power: AdapterPowerState) {
        info!("Adapter power state: {:?}", power);
        self.power = power;
        // A power cycle kills any bound session whether or not the stack
        // delivers a disconnect event, so every On transition restarts
        // from scratch.
        if power == AdapterPowerState::On && self.started {
            self.reset();
        } else {
            self.store.notify();
        }
    }

    /// First matching discovery wins: stop scanning, bind, connect. Later
    /// discoveries while bound are ignored.
    pub fn on_peripheral_discovered(&mut self, info: PeripheralInfo) {
        if self.peripheral.is_some() {
            debug!("Ignoring discovery of {} while already bound", info.id);
            return;
        }
        info!(
            "Found scale {} ({}), connecting",
            info.name.as_deref().unwrap_or("unnamed"),
            info.id
        );
        self.central.stop_scan();
        self.central.connect(&info.id);
        self.peripheral = Some(info);
        self.state = ConnectionState::Connecting;
        self.store.notify();
    }

    pub fn on_connected(&mut self, peripheral: &str) {
        if !self.is_bound(peripheral) {
            return;
        }
        debug!("Connected to {}, discovering weight scale service", peripheral);
        self.state = ConnectionState::DiscoveringService;
        self.central
            .discover_service(peripheral, bluetooth_uuid(WEIGHT_SCALE_SERVICE));
    }

    pub fn on_connect_failed(&mut self, peripheral: &str) {
        if !self.is_bound(peripheral) {
            return;
        }
        warn!("Connect to {} failed, rescanning", peripheral);
        self.reset();
    }

    pub fn on_disconnected(&mut self, peripheral: &str) {
        if !self.is_bound(peripheral) {
            return;
        }
        warn!("Disconnected from {}, rescanning", peripheral);
        self.reset();
    }

    pub fn on_service_discovered(&mut self, peripheral: &str, service: Option<ServiceHandle>) {
        if !self.is_bound(peripheral) {
            return;
        }
        match service {
            Some(handle) => {
                self.service = Some(handle);
                self.state = ConnectionState::DiscoveringCharacteristic;
                self.central.discover_characteristic(
                    peripheral,
                    handle,
                    bluetooth_uuid(WEIGHT_MEASUREMENT_CHAR),
                );
            }
            None => {
                warn!("Weight Scale service not found on {}", peripheral);
                self.reset();
            }
        }
    }

    pub fn on_characteristic_discovered(
        &mut self,
        peripheral: &str,
        characteristic: Option<CharacteristicHandle>,
    ) {
        if !self.is_bound(peripheral) || self.service.is_none() {
            return;
        }
        match characteristic {
            Some(handle) => {
                // The event model has no subscription ack; the link is Ready
                // as soon as the notification enable is issued.
                self.state = ConnectionState::Subscribing;
                self.central.subscribe(peripheral, handle);
                self.characteristic = Some(handle);
                self.state = ConnectionState::Ready;
                info!("Subscribed to weight measurements on {}", peripheral);
                self.store.notify();
            }
            None => {
                warn!("Weight Measurement characteristic not found on {}", peripheral);
                self.reset();
            }
        }
    }

    /// Decodes one notification value. Malformed packets are dropped whole
    /// with a log line; valid outcomes flow into the reading store.
    pub fn on_value_updated(
        &mut self,
        peripheral: &str,
        characteristic: CharacteristicHandle,
        value: Option<&[u8]>,
    ) {
        if !self.is_bound(peripheral) || self.characteristic != Some(characteristic) {
            debug!("Ignoring value update for stale characteristic");
            return;
        }
        let previous = self.store.reading();
        match decode_measurement(value, previous.as_ref(), self.policy) {
            Ok(decoded) => self.store.apply(decoded),
            Err(e) => warn!("Dropping measurement packet: {}", e),
        }
    }

    fn is_bound(&self, peripheral: &str) -> bool {
        self.peripheral.as_ref().is_some_and(|p| p.id == peripheral)
    }

    /// The sole recovery path: drop all session state, cancel anything
    /// outstanding, clear the reading and rescan. Notifies exactly once.
    fn reset(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            self.service = None;
            self.characteristic = None;
            self.central.cancel_connect(&peripheral.id);
        }
        self.store.clear_silent();
        self.central
            .start_scan(bluetooth_uuid(WEIGHT_SCALE_SERVICE));
        self.state = ConnectionState::Scanning;
        self.store.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChangeChannel;
    use std::sync::Arc;

    /// Fake radio that records every command issued to it.
    struct RecordingCentral {
        commands: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl RecordingCentral {
        fn new() -> (Self, Arc<std::sync::Mutex<Vec<String>>>) {
            let commands = Arc::new(std::sync::Mutex::new(Vec::new()));
            (
                Self {
                    commands: Arc::clone(&commands),
                },
                commands,
            )
        }
    }

    impl Central for RecordingCentral {
        fn start_scan(&mut self, _service: uuid::Uuid) {
            self.commands.lock().unwrap().push("start_scan".into());
        }
        fn stop_scan(&mut self) {
            self.commands.lock().unwrap().push("stop_scan".into());
        }
        fn connect(&mut self, peripheral: &str) {
            self.commands
                .lock()
                .unwrap()
                .push(format!("connect {}", peripheral));
        }
        fn cancel_connect(&mut self, peripheral: &str) {
            self.commands
                .lock()
                .unwrap()
                .push(format!("cancel {}", peripheral));
        }
        fn discover_service(&mut self, peripheral: &str, _service: uuid::Uuid) {
            self.commands
                .lock()
                .unwrap()
                .push(format!("discover_service {}", peripheral));
        }
        fn discover_characteristic(
            &mut self,
            peripheral: &str,
            _service: ServiceHandle,
            _characteristic: uuid::Uuid,
        ) {
            self.commands
                .lock()
                .unwrap()
                .push(format!("discover_characteristic {}", peripheral));
        }
        fn subscribe(&mut self, peripheral: &str, _characteristic: CharacteristicHandle) {
            self.commands
                .lock()
                .unwrap()
                .push(format!("subscribe {}", peripheral));
        }
    }

    struct Fixture {
        link: ScaleLink<RecordingCentral>,
        commands: Arc<std::sync::Mutex<Vec<String>>>,
        changes: Arc<ChangeChannel>,
    }

    fn fixture(policy: DecodePolicy) -> Fixture {
        let changes = Arc::new(ChangeChannel::new());
        let (central, commands) = RecordingCentral::new();
        let link = ScaleLink::new(central, policy, Arc::clone(&changes));
        Fixture {
            link,
            commands,
            changes,
        }
    }

    fn scale(id: &str) -> PeripheralInfo {
        PeripheralInfo {
            id: id.to_string(),
            name: Some("MiScale".to_string()),
        }
    }

    fn drain_signals(changes: &ChangeChannel) -> usize {
        let mut count = 0;
        while changes.try_receive().is_ok() {
            count += 1;
        }
        count
    }

    fn drain_commands(commands: &std::sync::Mutex<Vec<String>>) -> Vec<String> {
        std::mem::take(&mut commands.lock().unwrap())
    }

    /// Drives a fresh link all the way to Ready.
    fn ready_fixture() -> Fixture {
        let mut f = fixture(DecodePolicy::StableFlag);
        f.link.start();
        f.link.on_power_changed(AdapterPowerState::On);
        f.link.on_peripheral_discovered(scale("scale-1"));
        f.link.on_connected("scale-1");
        f.link
            .on_service_discovered("scale-1", Some(ServiceHandle(0x0010)));
        f.link
            .on_characteristic_discovered("scale-1", Some(CharacteristicHandle(0x0012)));
        assert_eq!(f.link.state(), ConnectionState::Ready);
        drain_signals(&f.changes);
        drain_commands(&f.commands);
        f
    }

    fn measurement_packet(flags: u16, raw: u16) -> Vec<u8> {
        let mut bytes = flags.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0x00, 0x00]);
        bytes.extend_from_slice(&raw.to_le_bytes());
        bytes
    }

    #[test]
    fn test_scan_starts_when_power_comes_on() {
        let mut f = fixture(DecodePolicy::StableFlag);
        f.link.start();
        assert_eq!(f.link.state(), ConnectionState::Idle);
        assert!(drain_commands(&f.commands).is_empty());

        f.link.on_power_changed(AdapterPowerState::On);
        assert_eq!(f.link.state(), ConnectionState::Scanning);
        assert_eq!(drain_commands(&f.commands), vec!["start_scan"]);
        assert_eq!(f.link.status(), "Looking for scale");

        // Idempotent once scanning.
        f.link.start();
        assert!(drain_commands(&f.commands).is_empty());
    }

    #[test]
    fn test_first_discovery_wins() {
        let mut f = fixture(DecodePolicy::StableFlag);
        f.link.start();
        f.link.on_power_changed(AdapterPowerState::On);
        drain_commands(&f.commands);

        f.link.on_peripheral_discovered(scale("scale-1"));
        f.link.on_peripheral_discovered(scale("scale-2"));

        assert_eq!(
            drain_commands(&f.commands),
            vec!["stop_scan", "connect scale-1"]
        );
        assert_eq!(f.link.state(), ConnectionState::Connecting);
        assert_eq!(f.link.status(), "Connecting");
    }

    #[test]
    fn test_happy_path_to_ready() {
        let f = ready_fixture();
        assert_eq!(f.link.status(), "MiScale");
        assert_eq!(
            f.link.device_identity(),
            Some(DeviceIdentity {
                name: Some("MiScale".to_string()),
                id: "scale-1".to_string(),
            })
        );
    }

    #[test]
    fn test_disconnect_while_ready_resets_with_one_signal() {
        let mut f = ready_fixture();
        f.link.on_value_updated(
            "scale-1",
            CharacteristicHandle(0x0012),
            Some(&measurement_packet(0x0400, 14000)),
        );
        assert!(f.link.reading().is_some());
        drain_signals(&f.changes);

        f.link.on_disconnected("scale-1");

        assert_eq!(f.link.state(), ConnectionState::Scanning);
        assert_eq!(f.link.reading(), None);
        assert_eq!(f.link.device_identity(), None);
        assert_eq!(
            drain_commands(&f.commands),
            vec!["cancel scale-1", "start_scan"]
        );
        assert_eq!(drain_signals(&f.changes), 1);
    }

    #[test]
    fn test_power_cycle_while_bound_restarts_scanning() {
        let mut f = ready_fixture();
        f.link.on_value_updated(
            "scale-1",
            CharacteristicHandle(0x0012),
            Some(&measurement_packet(0x0400, 14000)),
        );

        // No Disconnected event arrives for the dead session; the power
        // transition alone must tear it down.
        f.link.on_power_changed(AdapterPowerState::Off);
        f.link.on_power_changed(AdapterPowerState::On);

        assert_eq!(f.link.state(), ConnectionState::Scanning);
        assert_eq!(f.link.reading(), None);
        assert_eq!(f.link.device_identity(), None);
        assert_eq!(
            drain_commands(&f.commands),
            vec!["cancel scale-1", "start_scan"]
        );
    }

    #[test]
    fn test_connect_failure_resets() {
        let mut f = fixture(DecodePolicy::StableFlag);
        f.link.start();
        f.link.on_power_changed(AdapterPowerState::On);
        f.link.on_peripheral_discovered(scale("scale-1"));
        drain_commands(&f.commands);

        f.link.on_connect_failed("scale-1");

        assert_eq!(f.link.state(), ConnectionState::Scanning);
        assert_eq!(
            drain_commands(&f.commands),
            vec!["cancel scale-1", "start_scan"]
        );
    }

    #[test]
    fn test_missing_service_or_characteristic_resets() {
        let mut f = fixture(DecodePolicy::StableFlag);
        f.link.start();
        f.link.on_power_changed(AdapterPowerState::On);
        f.link.on_peripheral_discovered(scale("scale-1"));
        f.link.on_connected("scale-1");
        drain_commands(&f.commands);

        f.link.on_service_discovered("scale-1", None);
        assert_eq!(f.link.state(), ConnectionState::Scanning);

        f.link.on_peripheral_discovered(scale("scale-1"));
        f.link.on_connected("scale-1");
        f.link
            .on_service_discovered("scale-1", Some(ServiceHandle(0x0010)));
        drain_commands(&f.commands);

        f.link.on_characteristic_discovered("scale-1", None);
        assert_eq!(f.link.state(), ConnectionState::Scanning);
        assert_eq!(
            drain_commands(&f.commands),
            vec!["cancel scale-1", "start_scan"]
        );
    }

    #[test]
    fn test_events_for_stale_peripheral_are_ignored() {
        let mut f = ready_fixture();
        f.link.on_disconnected("scale-2");
        f.link.on_connect_failed("scale-2");
        f.link.on_value_updated(
            "scale-2",
            CharacteristicHandle(0x0012),
            Some(&measurement_packet(0x0400, 14000)),
        );
        assert_eq!(f.link.state(), ConnectionState::Ready);
        assert_eq!(f.link.reading(), None);
        assert!(drain_commands(&f.commands).is_empty());
    }

    #[test]
    fn test_malformed_packet_leaves_reading_untouched() {
        let mut f = ready_fixture();
        f.link.on_value_updated(
            "scale-1",
            CharacteristicHandle(0x0012),
            Some(&measurement_packet(0x0400, 14000)),
        );
        drain_signals(&f.changes);

        // Flags claim a timestamp that is not there.
        f.link
            .on_value_updated("scale-1", CharacteristicHandle(0x0012), Some(&[0x02, 0x04]));
        // Absent payload.
        f.link
            .on_value_updated("scale-1", CharacteristicHandle(0x0012), None);

        assert_eq!(f.link.reading().map(|r| r.value_kg), Some(70.0));
        assert_eq!(drain_signals(&f.changes), 0);
    }

    #[test]
    fn test_invalid_marker_clears_reading() {
        let mut f = ready_fixture();
        f.link.on_value_updated(
            "scale-1",
            CharacteristicHandle(0x0012),
            Some(&measurement_packet(0x0400, 14000)),
        );
        f.link.on_value_updated(
            "scale-1",
            CharacteristicHandle(0x0012),
            Some(&[0x00, 0x80]),
        );
        assert_eq!(f.link.reading(), None);
        assert_eq!(f.link.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_stability_counter_accumulates_across_notifications() {
        let mut f = ready_fixture();
        let stable = measurement_packet(0x2400, 14000);
        f.link
            .on_value_updated("scale-1", CharacteristicHandle(0x0012), Some(&stable));
        f.link
            .on_value_updated("scale-1", CharacteristicHandle(0x0012), Some(&stable));
        assert_eq!(f.link.reading().map(|r| r.stability_count), Some(2));
    }
}
