//! Latest-reading store and change notifier.
//!
//! Holds the most recent decoded reading (or none) plus an optional transient
//! status override, and wakes the listener through a payload-free channel.
//! The listener pulls current status and reading synchronously on each wake.

use crate::protocol::Decoded;
use crate::types::{ConnectionState, WeightReading};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use log::debug;
use std::sync::Arc;

pub type ChangeChannel = Channel<CriticalSectionRawMutex, (), 8>;

pub struct ReadingStore {
    current: Option<WeightReading>,
    status_override: Option<String>,
    changes: Arc<ChangeChannel>,
}

impl ReadingStore {
    pub fn new(changes: Arc<ChangeChannel>) -> Self {
        Self {
            current: None,
            status_override: None,
            changes,
        }
    }

    pub fn reading(&self) -> Option<WeightReading> {
        self.current
    }

    /// Applies one decoder outcome. Signals the listener unless the packet
    /// was a no-op.
    pub fn apply(&mut self, decoded: Decoded) {
        match decoded {
            Decoded::Reading(reading) => {
                self.current = Some(reading);
                self.notify();
            }
            Decoded::Invalidated => {
                self.current = None;
                self.notify();
            }
            Decoded::NoChange => {}
        }
    }

    /// Installs a transient status message. Expiry is driven by the caller,
    /// not the store.
    pub fn set_override(&mut self, text: String) {
        self.status_override = Some(text);
        self.notify();
    }

    pub fn clear_override(&mut self) {
        self.status_override = None;
        self.notify();
    }

    /// Clears the reading without signalling, for callers that fold the clear
    /// into a single transition notification.
    pub(crate) fn clear_silent(&mut self) {
        self.current = None;
    }

    pub fn notify(&self) {
        if self.changes.try_send(()).is_err() {
            // Wake signals are level-like; a full channel means the listener
            // already has a pending wake and will pull fresh state then.
            debug!("change channel full, listener wake already pending");
        }
    }

    /// Resolves the user-visible status string. The transient override wins;
    /// otherwise the connection state decides.
    pub fn derived_status(&self, state: ConnectionState, peripheral_name: Option<&str>) -> String {
        if let Some(text) = &self.status_override {
            return text.clone();
        }
        match state {
            ConnectionState::Idle | ConnectionState::Scanning => "Looking for scale".to_string(),
            ConnectionState::Connecting
            | ConnectionState::DiscoveringService
            | ConnectionState::DiscoveringCharacteristic
            | ConnectionState::Subscribing => "Connecting".to_string(),
            ConnectionState::Ready => peripheral_name.unwrap_or("Connected").to_string(),
        }
    }
}
