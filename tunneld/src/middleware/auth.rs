//! Access-token auth middleware (spec component C6).
//!
//! Runs in front of the WebSocket upgrade route: pulls `access_token`
//! out of the query string, hands it to the configured
//! [`TokenParser`](crate::claims::TokenParser), and stashes the
//! resulting [`Claims`](crate::claims::Claims) as a request extension
//! for the handler to pick up. Rejected requests never reach the
//! upgrade, so a bad token never costs a socket.

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;

use crate::claims::Claims;
use crate::http::ValidationError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AccessTokenQuery {
    access_token: Option<String>,
}

pub async fn require_access_token(
    State(state): State<AppState>,
    Query(query): Query<AccessTokenQuery>,
    mut request: Request,
    next: Next,
) -> Result<Response, ValidationError> {
    let token = query
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or(crate::claims::TokenError::MissingQueryParam)?;
    let claims: Claims = state.token_parser.parse(&token)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
