//! Axum routers.

mod common;
mod endpoint;

pub use common::common_routes;
pub use endpoint::endpoint_routes;

use crate::state::AppState;
use axum::Router;

/// Common routes plus the generic endpoint; fixed paths win over `/:route`.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(endpoint_routes(state))
}
