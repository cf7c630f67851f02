pub mod host_details;
pub mod logs;
pub mod ping;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::auth::require_access_token;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let logs_route = Router::new()
        .route("/logs", get(logs::handler))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_access_token));

    Router::new()
        .route("/ping", get(ping::handler))
        .route("/host_details", get(host_details::handler))
        .merge(logs_route)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
