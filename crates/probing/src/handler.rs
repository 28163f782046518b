//! HTTP endpoint answering peer probes.

use axum::routing::get;
use axum::{Json, Router};

use crate::probe::ProbeReply;

/// Router serving `GET <path>` with a healthy [`ProbeReply`] stamped with
/// the local clock. Merge it into the node's transport router.
pub fn probing_router(path: &str) -> Router {
    Router::new().route(path, get(handle_probe))
}

async fn handle_probe() -> Json<ProbeReply> {
    Json(ProbeReply::healthy_now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn probe_handler_reports_current_time() {
        let before = Utc::now();
        let Json(reply) = handle_probe().await;
        assert!(reply.ok);
        assert!(reply.now >= before);
        assert!(reply.now <= Utc::now());
    }
}
