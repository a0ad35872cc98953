use std::sync::Arc;

use axum::{routing::get, Router};

use shared_database::AppState;

use crate::handlers;

/// Slot catalog and availability queries.
pub fn availability_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/slots", get(handlers::list_slots))
        .route("/availability", get(handlers::get_availability_summary))
        .route("/availability/monthly", get(handlers::get_monthly_availability))
        .with_state(state)
}

/// Mounted under `/therapists`.
pub fn therapist_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/{therapist_id}/holidays",
            get(handlers::get_holidays).post(handlers::set_holidays),
        )
        .with_state(state)
}
