use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{role_to_string, *},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

/* ============================================================
   POST /auth/register
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// "PATIENT" or "DENTIST"
    pub role: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    /// Dentist-only
    pub specialty: Option<String>,
    pub clinic_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub data: AccountProfile,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();

    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::validation("a valid email is required"));
    }
    if req.password.len() < 6 {
        return Err(ApiError::validation("password must be at least 6 characters"));
    }
    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::validation("first_name and last_name are required"));
    }

    let role = match req.role.trim().to_uppercase().as_str() {
        "PATIENT" => ROLE_PATIENT,
        "DENTIST" => ROLE_DENTIST,
        _ => return Err(ApiError::validation("role must be PATIENT or DENTIST")),
    };

    let password_hash = hash_password(&req.password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let account_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO account (email, password_hash, role, is_active)
        VALUES ($1, $2, $3, true)
        RETURNING account_id
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(role)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::validation("email is already registered")
        }
        _ => ApiError::db(e),
    })?;

    if role == ROLE_PATIENT {
        sqlx::query(
            r#"
            INSERT INTO patient (account_id, first_name, last_name, phone)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account_id)
        .bind(first_name)
        .bind(last_name)
        .bind(req.phone.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    } else {
        let Some(clinic_id) = req.clinic_id else {
            return Err(ApiError::validation("clinic_id is required for dentist accounts"));
        };
        sqlx::query(
            r#"
            INSERT INTO dentist (account_id, clinic_id, first_name, last_name, specialty, phone)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account_id)
        .bind(clinic_id)
        .bind(first_name)
        .bind(last_name)
        .bind(req.specialty.as_deref())
        .bind(req.phone.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                ApiError::not_found("clinic")
            }
            _ => ApiError::db(e),
        })?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(RegisterResponse {
        data: AccountProfile {
            account_id,
            email,
            role: role_to_string(role),
        },
    }))
}

/* ============================================================
   POST /auth/login
   ============================================================ */

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let account: AccountRow = sqlx::query_as::<_, AccountRow>(
        r#"
        SELECT account_id, email, password_hash, role, is_active
        FROM account
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !account.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }

    if !verify_password(&req.password, &account.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token (account_id, session_token_hash, expires_at)
        VALUES ($1, $2, $3)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(account.account_id)
    .bind(&token_hash)
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(LoginResponse {
        data: LoginResponseData {
            access_token,
            expires_at: session.expires_at,
            account: AccountProfile {
                account_id: account.account_id,
                email: account.email,
                role: role_to_string(account.role),
            },
        },
    }))
}

/* ============================================================
   GET /auth/me
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeData,
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub account: AccountProfile,
    pub session_token_id: Uuid,
    pub display_name: Option<String>,
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<MeResponse>, ApiError> {
    // Profile name lives on the role-specific table.
    let display_name: Option<String> = sqlx::query_scalar(
        r#"
        SELECT first_name || ' ' || last_name
        FROM patient
        WHERE account_id = $1
        UNION ALL
        SELECT first_name || ' ' || last_name
        FROM dentist
        WHERE account_id = $1
        LIMIT 1
        "#,
    )
    .bind(auth.account_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(MeResponse {
        data: MeData {
            account: AccountProfile {
                account_id: auth.account_id,
                email: auth.email.clone(),
                role: role_to_string(auth.role),
            },
            session_token_id: auth.session_token_id,
            display_name,
        },
    }))
}

/* ============================================================
   POST /auth/logout
   ============================================================ */

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND account_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.account_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
