//! External health record store collaborator.
//!
//! The store is injected as a trait, never reached through a global. Save
//! requests and outcomes travel over channels so the IO-bound save never runs
//! on the controller's serialized context, and its completion is re-dispatched
//! there before any shared state is touched.

use crate::types::DeviceIdentity;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::Instant;
use log::{info, warn};
use thiserror::Error;

/// What the core hands to the health store: the value, when it was measured,
/// and which device produced it. The store's persistence format is its own
/// business.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSample {
    pub value_kg: f64,
    pub timestamp: Instant,
    pub device: Option<DeviceIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveError {
    #[error("health store not authorized")]
    NotAuthorized,
    #[error("health store rejected the sample: {0}")]
    Rejected(String),
}

/// Asynchronous sample sink. Implementations may take unbounded time; the
/// core imposes no timeout.
pub trait HealthStore {
    async fn save(&self, sample: WeightSample) -> Result<(), SaveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Failed,
}

pub type SaveRequestChannel = Channel<CriticalSectionRawMutex, WeightSample, 2>;
pub type SaveOutcomeChannel = Channel<CriticalSectionRawMutex, SaveOutcome, 2>;

/// Worker loop: runs each save against the injected store and reports the
/// outcome back to the controller's event loop. Failures are never fatal;
/// the reading stays available for a retry.
pub async fn run_save_worker<S: HealthStore>(
    store: S,
    requests: &SaveRequestChannel,
    outcomes: &SaveOutcomeChannel,
) -> ! {
    loop {
        let sample = requests.receive().await;
        info!("Saving {:.2} kg sample to health store", sample.value_kg);
        let outcome = match store.save(sample).await {
            Ok(()) => SaveOutcome::Saved,
            Err(e) => {
                warn!("Health store save failed: {}", e);
                SaveOutcome::Failed
            }
        };
        outcomes.send(outcome).await;
    }
}
