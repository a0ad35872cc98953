use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use booking_cell::router::{booking_request_routes, booking_routes};
use shared_database::AppState;
use therapist_cell::router::{availability_routes, therapist_routes};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .merge(availability_routes(state.clone()))
        .nest("/therapists", therapist_routes(state.clone()))
        .nest("/bookings", booking_routes(state.clone()))
        .nest("/booking-requests", booking_request_routes(state))
}
