use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Identifying information about this host, spec.md §6's optional
/// `/host_details` endpoint. Unauthenticated, same as `/ping`.
#[derive(Debug, Serialize)]
pub struct HostDetails {
    pub connector_id: uuid::Uuid,
    pub ip: std::net::IpAddr,
    pub hostname: String,
}

pub async fn handler(State(state): State<AppState>) -> Json<HostDetails> {
    let conf = state.conf.get_conf();
    Json(HostDetails {
        connector_id: conf.connector_id,
        ip: conf.bind_addr.ip(),
        hostname: conf.hostname.clone(),
    })
}
