//! The detection pipeline task.
//!
//! Single consumer of the observation channel: classify, ask the throttle,
//! then deliver or store. Within one session events arrive in order
//! because each listener emits into the channel from its own session task.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use netsnare_classify::classify;
use netsnare_report::ReportClient;
use netsnare_throttle::{Admission, ThrottleCache};
use snare_core::ObservationEvent;

pub async fn run_pipeline(
    mut events: mpsc::Receiver<ObservationEvent>,
    throttle: Arc<ThrottleCache>,
    client: Arc<ReportClient>,
    store_throttled: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(event, &throttle, &client, store_throttled).await;
            }
            _ = shutdown.changed() => {
                info!("pipeline shutting down");
                break;
            }
        }
    }
}

async fn handle_event(
    event: ObservationEvent,
    throttle: &ThrottleCache,
    client: &ReportClient,
    store_throttled: bool,
) {
    let record = classify(&event);
    debug!(
        ip = %record.ip_address,
        kind = %record.attack_type,
        original = %event.kind,
        "observation classified"
    );

    match throttle.admit(record.ip_address, record.attack_type) {
        Admission::Admit => {
            // Failures already landed the record in the spool.
            if let Err(e) = client.submit(&record).await {
                warn!(ip = %record.ip_address, error = %e, "report delivery failed, spooled");
            }
        }
        Admission::Suppress(reason) => {
            debug!(ip = %record.ip_address, ?reason, "report suppressed");
            if store_throttled {
                if let Err(e) = client.store_throttled(&record) {
                    warn!(error = %e, "failed to store throttled record");
                }
            }
        }
    }
}
