//! Radio abstraction.
//!
//! Commands toward the radio go through the [`Central`] trait, one method per
//! operation; events from the radio arrive as [`CentralEvent`] values, one
//! variant per callback. Platform adapters sit behind this seam, and tests
//! substitute a fake that records the commands it was given.

use crate::types::{AdapterPowerState, CharacteristicHandle, PeripheralInfo, ServiceHandle};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use uuid::Uuid;

/// Largest notification payload the protocol can produce, with headroom.
pub const MAX_PACKET_LEN: usize = 20;

/// Notification payload, bounded because measurement packets are 2-15 bytes.
pub type Payload = heapless::Vec<u8, MAX_PACKET_LEN>;

/// One radio callback, delivered in arrival order on the controller's
/// serialized context.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    PowerChanged(AdapterPowerState),
    PeripheralDiscovered(PeripheralInfo),
    Connected {
        peripheral: String,
    },
    ConnectFailed {
        peripheral: String,
    },
    Disconnected {
        peripheral: String,
    },
    /// Service discovery finished; `service` is the target service's handle
    /// when the peripheral exposes it.
    ServiceDiscovered {
        peripheral: String,
        service: Option<ServiceHandle>,
    },
    /// Characteristic discovery finished on the target service.
    CharacteristicDiscovered {
        peripheral: String,
        characteristic: Option<CharacteristicHandle>,
    },
    /// A notification arrived. `value` is absent when the platform delivered
    /// an empty update.
    ValueUpdated {
        peripheral: String,
        characteristic: CharacteristicHandle,
        value: Option<Payload>,
    },
}

pub type CentralEventChannel = Channel<CriticalSectionRawMutex, CentralEvent, 10>;

/// Commands the connection state machine issues to the radio. All methods are
/// fire-and-forget; results come back as [`CentralEvent`]s.
pub trait Central {
    fn start_scan(&mut self, service: Uuid);
    fn stop_scan(&mut self);
    fn connect(&mut self, peripheral: &str);
    /// Cancels a pending or established connection to the peripheral.
    fn cancel_connect(&mut self, peripheral: &str);
    fn discover_service(&mut self, peripheral: &str, service: Uuid);
    fn discover_characteristic(
        &mut self,
        peripheral: &str,
        service: ServiceHandle,
        characteristic: Uuid,
    );
    fn subscribe(&mut self, peripheral: &str, characteristic: CharacteristicHandle);
}
