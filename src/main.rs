use bascule_rs::central::CentralEventChannel;
use bascule_rs::controller::{
    ScaleController, SnapshotHandle, StatusSnapshot, UiCommand, UiCommandChannel,
};
use bascule_rs::health::{
    run_save_worker, HealthStore, SaveError, SaveOutcomeChannel, SaveRequestChannel, WeightSample,
};
use bascule_rs::link::ScaleLink;
use bascule_rs::protocol::DecodePolicy;
use bascule_rs::sim::{run_notifier, SimulatedCentral};
use bascule_rs::store::ChangeChannel;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use env_logger::Builder;
use log::{info, LevelFilter};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Stand-in for the platform health record store: pretends the save takes a
/// network round trip.
struct DemoHealthStore;

impl HealthStore for DemoHealthStore {
    async fn save(&self, sample: WeightSample) -> Result<(), SaveError> {
        Timer::after(Duration::from_millis(300)).await;
        info!(
            "[health] stored {:.2} kg from {}",
            sample.value_kg,
            sample
                .device
                .and_then(|d| d.name)
                .unwrap_or_else(|| "unknown device".to_string())
        );
        Ok(())
    }
}

#[embassy_executor::task]
async fn controller_task(mut controller: ScaleController<SimulatedCentral>) -> ! {
    controller.run().await
}

#[embassy_executor::task]
async fn notifier_task(events: Arc<CentralEventChannel>, subscribed: Arc<AtomicBool>) -> ! {
    run_notifier(events, subscribed).await
}

#[embassy_executor::task]
async fn save_task(requests: Arc<SaveRequestChannel>, outcomes: Arc<SaveOutcomeChannel>) -> ! {
    run_save_worker(DemoHealthStore, &requests, &outcomes).await
}

/// The "UI": wakes on every change signal, pulls the snapshot, and saves once
/// the weight has been stable for a few notifications.
#[embassy_executor::task]
async fn ui_task(
    changes: Arc<ChangeChannel>,
    snapshot: Arc<SnapshotHandle>,
    commands: Arc<UiCommandChannel>,
) -> ! {
    loop {
        changes.receive().await;
        let snap = snapshot.lock().await.clone();
        match snap.value_kg {
            Some(kg) => info!(
                "[ui] {} | {:.1} kg (stable x{})",
                snap.status,
                kg,
                snap.stability_count.unwrap_or(0)
            ),
            None => info!("[ui] {} | --", snap.status),
        }
        if snap.can_save && snap.stability_count == Some(3) {
            info!("[ui] weight settled, logging to health store");
            let _ = commands.try_send(UiCommand::SaveReading);
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    Builder::new().filter_level(LevelFilter::Info).init();

    info!("Starting bascule demo with simulated radio");

    let events = Arc::new(CentralEventChannel::new());
    let changes = Arc::new(ChangeChannel::new());
    let commands = Arc::new(UiCommandChannel::new());
    let save_requests = Arc::new(SaveRequestChannel::new());
    let save_outcomes = Arc::new(SaveOutcomeChannel::new());
    let snapshot = Arc::new(SnapshotHandle::new(StatusSnapshot::default()));

    let central = SimulatedCentral::new(Arc::clone(&events));
    let subscribed = central.subscribed_flag();
    let link = ScaleLink::new(central, DecodePolicy::StableFlag, Arc::clone(&changes));
    let controller = ScaleController::new(
        link,
        Arc::clone(&events),
        Arc::clone(&commands),
        Arc::clone(&save_requests),
        Arc::clone(&save_outcomes),
        Arc::clone(&snapshot),
    );

    spawner.spawn(controller_task(controller)).unwrap();
    spawner.spawn(notifier_task(events, subscribed)).unwrap();
    spawner
        .spawn(save_task(save_requests, save_outcomes))
        .unwrap();
    spawner.spawn(ui_task(changes, snapshot, commands)).unwrap();
}
