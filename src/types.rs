use embassy_time::Instant;
use serde::{Deserialize, Serialize};

/// Power state of the local Bluetooth adapter, as reported by the radio
/// subsystem. Scanning is gated on `On`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterPowerState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    Off,
    On,
}

/// Lifecycle of the link to the scale. Every state other than `Idle` and
/// `Scanning` has exactly one peripheral bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringService,
    DiscoveringCharacteristic,
    Subscribing,
    Ready,
}

/// Identity of a discovered peripheral: a stable identifier string plus the
/// advertised display name, when one was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralInfo {
    pub id: String,
    pub name: Option<String>,
}

/// GATT service handle, valid only for the session of the peripheral it was
/// discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHandle(pub u16);

/// GATT characteristic handle, scoped like [`ServiceHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandle(pub u16);

/// A decoded weight measurement. Superseded by the next reading, never
/// mutated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightReading {
    pub value_kg: f64,
    pub timestamp: Instant,
    /// Consecutive notifications considered stable, per the configured
    /// [`DecodePolicy`](crate::protocol::DecodePolicy).
    pub stability_count: u32,
}

/// Read-only identity of the connected scale, handed to the health store
/// alongside each saved sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: Option<String>,
    pub id: String,
}
