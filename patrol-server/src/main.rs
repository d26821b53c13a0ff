use patrol_core::store::FindingsStore;
use patrol_server::{api, webhook};
use tracing::{info, warn};

const CLEANUP_MAX_AGE_SECS: i64 = 30 * 24 * 3600;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let db_path = std::env::var("PATROL_DB").unwrap_or_else(|_| "findings.db".into());
    let listen = std::env::var("PATROL_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".into());

    let store = FindingsStore::open(&db_path).expect("open findings store");

    let maintenance = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = now_ts();
            if let Err(err) = maintenance.pending_approvals(now) {
                warn!("approval expiry sweep failed: {err}");
            }
            match maintenance.cleanup(CLEANUP_MAX_AGE_SECS, now) {
                Ok(0) => {}
                Ok(removed) => info!("cleaned up {removed} old resolved findings"),
                Err(err) => warn!("finding cleanup failed: {err}"),
            }
        }
    });

    let app = webhook::ingest_router(store.clone()).merge(api::api_router(store));
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .expect("bind listener");

    info!("patrol-server listening on {listen}");
    axum::serve(listener, app).await.expect("serve");
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    duration.as_secs() as i64
}
