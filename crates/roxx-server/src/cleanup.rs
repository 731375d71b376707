use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use roxx_db::Database;

/// Background task that purges calls past their maximum age.
pub async fn run_call_gc_loop(db: Arc<Database>, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.purge_stale_calls(Utc::now())).await {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Call GC: purged {} stale calls", count);
                }
            }
            Ok(Err(e)) => warn!("Call GC error: {}", e),
            Err(e) => warn!("Call GC task failed: {}", e),
        }
    }
}
