pub mod hosts;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/hosts", post(hosts::create_host).get(hosts::list_hosts))
        .route(
            "/hosts/{id}",
            get(hosts::get_host).delete(hosts::delete_host),
        )
        .route("/hosts/{id}/status", get(hosts::host_status))
        .route("/hosts/{id}/start", post(hosts::start_host))
        .route("/hosts/{id}/stop", post(hosts::stop_host))
        // Auth middleware
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authed)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
