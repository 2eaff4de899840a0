//! The single serialized execution context.
//!
//! All radio events, UI commands and save outcomes are funneled through one
//! select loop, so the state machine and decoder run without any locking of
//! their own. Save completions arrive over a channel, which is what re-routes
//! them onto this context from wherever the worker ran.

use crate::central::{Central, CentralEventChannel};
use crate::health::{SaveOutcome, SaveOutcomeChannel, SaveRequestChannel, WeightSample};
use crate::link::ScaleLink;
use crate::types::ConnectionState;
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, mutex::Mutex};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

/// Commands from the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    /// Persist the current reading to the health store.
    SaveReading,
}

pub type UiCommandChannel = Channel<CriticalSectionRawMutex, UiCommand, 5>;

/// How long a save outcome message stays in the status line.
pub const STATUS_OVERRIDE_MS: u64 = 2000;
const TICK_MS: u64 = 100;

/// State the listener pulls after each change signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub state: ConnectionState,
    pub value_kg: Option<f64>,
    pub stability_count: Option<u32>,
    pub can_save: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: "Looking for scale".to_string(),
            state: ConnectionState::Idle,
            value_kg: None,
            stability_count: None,
            can_save: false,
        }
    }
}

pub type SnapshotHandle = Mutex<CriticalSectionRawMutex, StatusSnapshot>;

pub struct ScaleController<C: Central> {
    link: ScaleLink<C>,
    events: Arc<CentralEventChannel>,
    commands: Arc<UiCommandChannel>,
    save_requests: Arc<SaveRequestChannel>,
    save_outcomes: Arc<SaveOutcomeChannel>,
    snapshot: Arc<SnapshotHandle>,
    /// Deadline for clearing the transient status, replaced whenever a newer
    /// save outcome arrives (replace-on-restart).
    pending_override_clear: Option<Instant>,
    save_in_flight: bool,
}

impl<C: Central> ScaleController<C> {
    pub fn new(
        link: ScaleLink<C>,
        events: Arc<CentralEventChannel>,
        commands: Arc<UiCommandChannel>,
        save_requests: Arc<SaveRequestChannel>,
        save_outcomes: Arc<SaveOutcomeChannel>,
        snapshot: Arc<SnapshotHandle>,
    ) -> Self {
        Self {
            link,
            events,
            commands,
            save_requests,
            save_outcomes,
            snapshot,
            pending_override_clear: None,
            save_in_flight: false,
        }
    }

    pub fn can_save(&self) -> bool {
        !self.save_in_flight && self.link.reading().is_some()
    }

    pub async fn run(&mut self) -> ! {
        self.link.start();
        self.publish().await;

        loop {
            let event_fut = self.events.receive();
            let outcome_fut = self.save_outcomes.receive();
            let command_fut = self.commands.receive();
            let tick_fut = Timer::after(Duration::from_millis(TICK_MS));

            match select(
                select(event_fut, outcome_fut),
                select(command_fut, tick_fut),
            )
            .await
            {
                Either::First(Either::First(event)) => {
                    self.link.handle_event(event);
                    self.publish().await;
                }
                Either::First(Either::Second(outcome)) => {
                    self.handle_save_outcome(outcome);
                    self.publish().await;
                }
                Either::Second(Either::First(command)) => {
                    self.handle_command(command);
                    self.publish().await;
                }
                Either::Second(Either::Second(())) => {
                    if self.periodic_update() {
                        self.publish().await;
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: UiCommand) {
        match command {
            UiCommand::SaveReading => {
                if self.save_in_flight {
                    debug!("Save already in flight, ignoring request");
                    return;
                }
                let Some(reading) = self.link.reading() else {
                    debug!("No reading to save");
                    return;
                };
                let sample = WeightSample {
                    value_kg: reading.value_kg,
                    timestamp: reading.timestamp,
                    device: self.link.device_identity(),
                };
                if self.save_requests.try_send(sample).is_err() {
                    warn!("Save request channel full, dropping request");
                    return;
                }
                self.save_in_flight = true;
            }
        }
    }

    fn handle_save_outcome(&mut self, outcome: SaveOutcome) {
        self.save_in_flight = false;
        let text = match outcome {
            SaveOutcome::Saved => "Saved 👍",
            SaveOutcome::Failed => "Failed 👎",
        };
        self.link.store_mut().set_override(text.to_string());
        self.pending_override_clear =
            Some(Instant::now() + Duration::from_millis(STATUS_OVERRIDE_MS));
    }

    /// Expires the transient status once its deadline passes. Returns true
    /// when something user-visible changed.
    fn periodic_update(&mut self) -> bool {
        if let Some(deadline) = self.pending_override_clear {
            if Instant::now() >= deadline {
                self.pending_override_clear = None;
                self.link.store_mut().clear_override();
                return true;
            }
        }
        false
    }

    fn build_snapshot(&self) -> StatusSnapshot {
        let reading = self.link.reading();
        StatusSnapshot {
            status: self.link.status(),
            state: self.link.state(),
            value_kg: reading.map(|r| r.value_kg),
            stability_count: reading.map(|r| r.stability_count),
            can_save: self.can_save(),
        }
    }

    async fn publish(&self) {
        let snapshot = self.build_snapshot();
        *self.snapshot.lock().await = snapshot;
    }
}
