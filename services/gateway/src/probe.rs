use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::supervisor::Supervisor;

const PROBE_INTERVAL: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: u32 = 90;

/// Poll the model server's health endpoint until it answers 200 or the
/// attempt ceiling is hit. Runs as its own task, never on a request path.
///
/// Readiness is only recorded when `generation` is still current; a prober
/// outliving its launch loses that comparison and records nothing. There is
/// no explicit cancellation when superseded.
pub async fn probe_until_ready(supervisor: Arc<Supervisor>, generation: u64) {
    probe_with(supervisor, generation, PROBE_INTERVAL, MAX_ATTEMPTS).await;
}

async fn probe_with(
    supervisor: Arc<Supervisor>,
    generation: u64,
    interval: Duration,
    max_attempts: u32,
) {
    for attempt in 1..=max_attempts {
        let result = supervisor
            .client()
            .get(supervisor.health_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                if supervisor.mark_ready(generation) {
                    info!(generation, attempt, "model server healthy");
                } else {
                    debug!(generation, "healthy response for superseded generation, ignored");
                }
                return;
            }
            Ok(resp) => {
                debug!(generation, attempt, status = %resp.status(), "model server not ready");
            }
            Err(e) => {
                debug!(generation, attempt, "health probe failed: {e}");
            }
        }

        tokio::time::sleep(interval).await;
    }

    warn!(generation, attempts = max_attempts, "model server never became healthy, giving up");
}
