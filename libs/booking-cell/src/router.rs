use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shared_database::AppState;

use crate::handlers;

/// Mounted under `/bookings`.
pub fn booking_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(handlers::create_booking))
        .route("/check-in", post(handlers::check_in))
        .route(
            "/{booking_id}",
            get(handlers::get_booking)
                .put(handlers::update_booking)
                .delete(handlers::delete_booking),
        )
        .route("/{booking_id}/collect-payment", post(handlers::collect_payment))
        .with_state(state)
}

/// Mounted under `/booking-requests`.
pub fn booking_request_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{request_id}", get(handlers::get_booking_request))
        .route("/{request_id}/reject", post(handlers::reject_booking_request))
        .with_state(state)
}
