#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    chat::chat,
    inbox::{agent_drop, get_inbox, inbox_action},
    liveness::live,
    memories::{create_memory, delete_memory},
    readiness::ready,
    search::search_memories,
};

pub mod api_state;
pub mod error;
mod guardrails;
mod middleware_api_auth;
pub mod rate_limit;
mod routes;

/// Generous transport-level cap on the agent drop route; the handler itself
/// enforces the exact 50 KiB policy boundary.
const DROP_ROUTE_BODY_LIMIT: usize = 64 * 1024;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints: probes plus the token-addressed
    // agent drop box.
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route(
            "/inbox/drop/{token}",
            post(agent_drop).layer(DefaultBodyLimit::max(DROP_ROUTE_BODY_LIMIT)),
        );

    // Protected endpoints require an authenticated principal.
    let protected = Router::new()
        .route("/memories", post(create_memory))
        .route("/memories/{id}", delete(delete_memory))
        .route("/inbox", get(get_inbox))
        .route("/inbox/{id}/action", post(inbox_action))
        .route("/retrieval/search", post(search_memories))
        .route("/llm/chat", post(chat))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
