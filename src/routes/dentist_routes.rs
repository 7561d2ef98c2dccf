// src/routes/dentist_routes.rs

use axum::{Json, Router, extract::State, routing::get};

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, DentistRow},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_dentists))
}

/// Directory used by the booking form to pick a dentist.
pub async fn list_dentists(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<DentistRow>>, ApiError> {
    let rows: Vec<DentistRow> = sqlx::query_as::<_, DentistRow>(
        r#"
        SELECT
          d.dentist_id,
          d.clinic_id,
          d.first_name,
          d.last_name,
          d.specialty,
          c.name AS clinic_name
        FROM dentist d
        JOIN clinic c ON c.clinic_id = d.clinic_id
        ORDER BY d.last_name ASC, d.first_name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(rows))
}
