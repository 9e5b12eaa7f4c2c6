//! Logs device list changes and pipeline outcomes

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use hal_core::StoreEvent;
use hal_hotplug::{HotplugController, PipelineEvent};

pub async fn log_store_events(controller: HotplugController) {
    let Some(mut store) = controller.store().subscribe() else {
        return;
    };
    let mut pipeline = controller.subscribe();

    loop {
        tokio::select! {
            event = store.recv() => match event {
                Ok(StoreEvent::Added(udi)) => info!(udi = %udi, "Device added"),
                Ok(StoreEvent::Removed(udi)) => info!(udi = %udi, "Device removed"),
                Ok(StoreEvent::PropertiesChanged(udi)) => debug!(udi = %udi, "Device properties changed"),
                Err(RecvError::Lagged(n)) => warn!("Store event subscriber lagged, missed {} events", n),
                Err(RecvError::Closed) => break,
            },
            event = pipeline.recv() => match event {
                Ok(PipelineEvent::Ended { id, outcome }) => {
                    debug!(id = %id, ?outcome, "Hotplug event ended")
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Pipeline subscriber lagged, missed {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }
}
