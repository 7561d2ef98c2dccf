use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod dentist_routes;
pub mod home_routes;
pub mod invoice_routes;
pub mod treatment_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/treatments", treatment_routes::router())
        .nest("/api/v1/dentists", dentist_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", invoice_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}
