// src/routes/treatment_routes.rs

use axum::{Json, Router, extract::State, routing::get};

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, TreatmentRow},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_treatments))
}

/// Catalog for the booking form: active treatments only. Inactive entries
/// stay valid on historical line items but cannot be booked anew.
pub async fn list_treatments(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<TreatmentRow>>, ApiError> {
    let rows: Vec<TreatmentRow> = sqlx::query_as::<_, TreatmentRow>(
        r#"
        SELECT
          treatment_id,
          name,
          description,
          default_price_cents,
          default_duration_minutes,
          is_active
        FROM treatment
        WHERE is_active = true
        ORDER BY name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(rows))
}
