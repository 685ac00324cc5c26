//! Generic endpoint routes: every method on `/{route}` with up to three options.

use crate::handlers::endpoint::dispatch;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn endpoint_routes(state: AppState) -> Router {
    let all = || get(dispatch).post(dispatch).put(dispatch).delete(dispatch);
    Router::new()
        .route("/:route", all())
        .route("/:route/:option1", all())
        .route("/:route/:option1/:option2", all())
        .route("/:route/:option1/:option2/:option3", all())
        .with_state(state)
}
