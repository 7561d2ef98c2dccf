// src/routes/appointment_routes.rs

use std::collections::{HashMap, HashSet};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::lifecycle::{self, Action},
    domain::ownership::ensure_owner,
    domain::scheduling,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, AppointmentStatus, InvoiceStatus, ROLE_DENTIST, ROLE_PATIENT,
    },
};

const PAGE_SIZE: i64 = 10;

fn is_patient(auth: &AuthContext) -> bool {
    auth.role == ROLE_PATIENT
}
fn is_dentist(auth: &AuthContext) -> bool {
    auth.role == ROLE_DENTIST
}

fn ensure_patient(auth: &AuthContext) -> Result<(), ApiError> {
    if is_patient(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only patients can perform this action".into(),
        ))
    }
}

fn ensure_dentist(auth: &AuthContext) -> Result<(), ApiError> {
    if is_dentist(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only dentists can perform this action".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patient/appointments", get(list_patient_appointments).post(create_appointment))
        .route("/patient/appointments/{appointment_id}/confirm-attendance", post(confirm_attendance))
        .route("/patient/appointments/{appointment_id}/cancel", post(patient_cancel))
        .route("/patient/appointments/{appointment_id}/archive", post(patient_archive))
        .route("/dentist/appointments", get(list_dentist_appointments))
        .route("/dentist/appointments/{appointment_id}/confirm", post(dentist_confirm))
        .route("/dentist/appointments/{appointment_id}/cancel", post(dentist_cancel))
        .route("/dentist/appointments/{appointment_id}/complete", post(dentist_complete))
        .route("/dentist/appointments/{appointment_id}/archive", post(dentist_archive))
        .route("/appointments/slots", get(list_day_slots))
        .route("/appointments/{appointment_id}", get(get_appointment))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct PersonBrief {
    pub id: Uuid,
    pub display: String,
}

#[derive(Debug, Serialize)]
pub struct InvoiceBrief {
    pub invoice_id: Uuid,
    pub status: InvoiceStatus,
}

#[derive(Debug, Serialize)]
pub struct AppointmentListItem {
    pub appointment_id: Uuid,
    pub appointment_datetime: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub patient: PersonBrief,
    pub dentist: PersonBrief,
    /// Distinct treatment names, comma-joined ("Cleaning, X-Ray").
    pub treatments: String,
    pub invoice: Option<InvoiceBrief>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentPage {
    pub items: Vec<AppointmentListItem>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct LineItemDto {
    pub treatment_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct AppointmentDetail {
    pub appointment_id: Uuid,
    pub appointment_datetime: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub patient: PersonBrief,
    pub dentist: PersonBrief,
    pub treatments: Vec<LineItemDto>,
    pub invoice: Option<InvoiceBrief>,
}

#[derive(Debug, Serialize)]
pub struct ArchiveOutcome {
    pub archived: bool,
    /// "UNPAID_INVOICE" when an outstanding invoice blocks archival.
    pub reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct SlotsData {
    pub slot_minutes: u32,
    pub slots: Vec<DateTime<Utc>>,
}

/* ============================================================
   Query params
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PatientListQuery {
    pub hide_past: Option<bool>,
    pub days: Option<i64>,
    pub status: Option<String>,
    pub dentist_id: Option<Uuid>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DentistListQuery {
    pub hide_past: Option<bool>,
    pub days: Option<i64>,
    pub status: Option<String>,
    pub patient_name: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub dentist_id: Uuid,
    pub treatment_id: Option<Uuid>,
    /// YYYY-MM-DD
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub dentist_id: Uuid,
    pub treatment_id: Uuid,
    /// ISO local datetime, e.g. "2031-03-10T09:30" or "2031-03-10T09:30:00"
    pub appointment_datetime: String,
}

/* ============================================================
   Shared helpers
   ============================================================ */

fn parse_iso_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_status_param(raw: Option<&str>) -> Result<Option<AppointmentStatus>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => AppointmentStatus::parse(s)
            .map(Some)
            .ok_or_else(|| ApiError::validation(format!("unknown appointment status: {s}"))),
    }
}

/// Bulk auto-expiry: every appointment whose time has passed and whose
/// status is still live goes to EXPIRED in one conditional UPDATE. Runs
/// inline before listing queries so lists never show stale live rows.
/// Idempotent; safe under concurrent callers.
async fn expire_past_appointments(
    db: &sqlx::PgPool,
    now: DateTime<Utc>,
) -> Result<u64, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET status = $1
        WHERE appointment_datetime < $2
          AND status <> ALL($3)
        "#,
    )
    .bind(AppointmentStatus::Expired as i16)
    .bind(now)
    .bind(AppointmentStatus::terminal_codes())
    .execute(db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() > 0 {
        tracing::debug!(count = res.rows_affected(), "expired past appointments");
    }
    Ok(res.rows_affected())
}

/// Appointment plus the owning account emails on both sides. LEFT JOINs so
/// a broken profile chain shows up as a missing owner, not a query error.
#[derive(Debug, sqlx::FromRow)]
struct OwnedAppointmentRow {
    appointment_datetime: DateTime<Utc>,
    status: AppointmentStatus,
    archived_at: Option<DateTime<Utc>>,
    patient_email: Option<String>,
    dentist_email: Option<String>,
}

async fn load_owned(db: &sqlx::PgPool, appointment_id: Uuid) -> Result<OwnedAppointmentRow, ApiError> {
    sqlx::query_as::<_, OwnedAppointmentRow>(
        r#"
        SELECT
          a.appointment_datetime,
          a.status,
          a.archived_at,
          pa.email AS patient_email,
          da.email AS dentist_email
        FROM appointment a
        LEFT JOIN patient p  ON p.patient_id  = a.patient_id
        LEFT JOIN account pa ON pa.account_id = p.account_id
        LEFT JOIN dentist d  ON d.dentist_id  = a.dentist_id
        LEFT JOIN account da ON da.account_id = d.account_id
        WHERE a.appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("appointment"))
}

/// Guarded status write: the WHERE clause re-checks the status we validated
/// against, so no concurrent writer can interleave between check and write.
async fn apply_transition(
    db: &sqlx::PgPool,
    appointment_id: Uuid,
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET status = $3
        WHERE appointment_id = $1
          AND status = $2
        "#,
    )
    .bind(appointment_id)
    .bind(from as i16)
    .bind(to as i16)
    .execute(db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "INVALID_STATE",
            "appointment status changed concurrently; reload and retry".into(),
        ));
    }
    Ok(())
}

/* ============================================================
   Listings
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct ListingRow {
    appointment_id: Uuid,
    appointment_datetime: DateTime<Utc>,
    status: AppointmentStatus,
    patient_id: Uuid,
    p_first: String,
    p_last: String,
    dentist_id: Uuid,
    d_first: String,
    d_last: String,
}

async fn attach_listing_extras(
    db: &sqlx::PgPool,
    rows: Vec<ListingRow>,
) -> Result<Vec<AppointmentListItem>, ApiError> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.appointment_id).collect();

    let mut names_by_appointment: HashMap<Uuid, Vec<String>> = HashMap::new();
    let mut invoice_by_appointment: HashMap<Uuid, InvoiceBrief> = HashMap::new();

    if !ids.is_empty() {
        let name_rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT at.appointment_id, t.name
            FROM appointment_treatment at
            JOIN treatment t ON t.treatment_id = at.treatment_id
            WHERE at.appointment_id = ANY($1)
            ORDER BY t.name ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(db)
        .await
        .map_err(ApiError::db)?;

        for (appointment_id, name) in name_rows {
            names_by_appointment.entry(appointment_id).or_default().push(name);
        }

        let invoice_rows: Vec<(Uuid, Uuid, InvoiceStatus)> = sqlx::query_as(
            r#"
            SELECT appointment_id, invoice_id, status
            FROM invoice
            WHERE appointment_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(db)
        .await
        .map_err(ApiError::db)?;

        for (appointment_id, invoice_id, status) in invoice_rows {
            invoice_by_appointment.insert(appointment_id, InvoiceBrief { invoice_id, status });
        }
    }

    Ok(rows
        .into_iter()
        .map(|r| {
            let mut names = names_by_appointment.remove(&r.appointment_id).unwrap_or_default();
            names.dedup();
            AppointmentListItem {
                appointment_id: r.appointment_id,
                appointment_datetime: r.appointment_datetime,
                status: r.status,
                patient: PersonBrief {
                    id: r.patient_id,
                    display: format!("{} {}", r.p_first, r.p_last),
                },
                dentist: PersonBrief {
                    id: r.dentist_id,
                    display: format!("{} {}", r.d_first, r.d_last),
                },
                treatments: names.join(", "),
                invoice: invoice_by_appointment.remove(&r.appointment_id),
            }
        })
        .collect())
}

pub async fn list_patient_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<PatientListQuery>,
) -> Result<Json<ApiOk<AppointmentPage>>, ApiError> {
    ensure_patient(&auth)?;

    let now = Utc::now();
    expire_past_appointments(&state.db, now).await?;

    let status = parse_status_param(q.status.as_deref())?;
    let hide_past = q.hide_past.unwrap_or(true);
    let days = q.days.unwrap_or(30).max(1);
    let from_date: Option<DateTime<Utc>> = hide_past.then(|| now - Duration::days(days));
    let page = q.page.unwrap_or(0).max(0);

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT count(*)
        FROM appointment a
        JOIN patient p   ON p.patient_id  = a.patient_id
        JOIN account pa  ON pa.account_id = p.account_id
        WHERE pa.email = $1
          AND a.archived_at IS NULL
          AND ($2::timestamptz IS NULL OR a.appointment_datetime >= $2)
          AND ($3::smallint    IS NULL OR a.status = $3)
          AND ($4::uuid        IS NULL OR a.dentist_id = $4)
        "#,
    )
    .bind(&auth.email)
    .bind(from_date)
    .bind(status.map(|s| s as i16))
    .bind(q.dentist_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    let rows: Vec<ListingRow> = sqlx::query_as::<_, ListingRow>(
        r#"
        SELECT
          a.appointment_id,
          a.appointment_datetime,
          a.status,
          p.patient_id,
          p.first_name AS p_first,
          p.last_name  AS p_last,
          d.dentist_id,
          d.first_name AS d_first,
          d.last_name  AS d_last
        FROM appointment a
        JOIN patient p   ON p.patient_id  = a.patient_id
        JOIN account pa  ON pa.account_id = p.account_id
        JOIN dentist d   ON d.dentist_id  = a.dentist_id
        WHERE pa.email = $1
          AND a.archived_at IS NULL
          AND ($2::timestamptz IS NULL OR a.appointment_datetime >= $2)
          AND ($3::smallint    IS NULL OR a.status = $3)
          AND ($4::uuid        IS NULL OR a.dentist_id = $4)
        ORDER BY a.appointment_datetime DESC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(&auth.email)
    .bind(from_date)
    .bind(status.map(|s| s as i16))
    .bind(q.dentist_id)
    .bind(PAGE_SIZE)
    .bind(page * PAGE_SIZE)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let items = attach_listing_extras(&state.db, rows).await?;

    Ok(Json(ApiOk {
        data: AppointmentPage {
            items,
            page,
            page_size: PAGE_SIZE,
            total,
        },
    }))
}

pub async fn list_dentist_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<DentistListQuery>,
) -> Result<Json<ApiOk<AppointmentPage>>, ApiError> {
    ensure_dentist(&auth)?;

    let now = Utc::now();
    expire_past_appointments(&state.db, now).await?;

    let status = parse_status_param(q.status.as_deref())?;
    let hide_past = q.hide_past.unwrap_or(true);
    let days = q.days.unwrap_or(30).max(1);
    let from_date: Option<DateTime<Utc>> = hide_past.then(|| now - Duration::days(days));
    let page = q.page.unwrap_or(0).max(0);
    let patient_name = q.patient_name.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT count(*)
        FROM appointment a
        JOIN dentist d   ON d.dentist_id  = a.dentist_id
        JOIN account da  ON da.account_id = d.account_id
        JOIN patient p   ON p.patient_id  = a.patient_id
        WHERE da.email = $1
          AND a.archived_at IS NULL
          AND ($2::timestamptz IS NULL OR a.appointment_datetime >= $2)
          AND ($3::smallint    IS NULL OR a.status = $3)
          AND ($4::text IS NULL
               OR lower(p.first_name || ' ' || p.last_name) LIKE lower('%' || $4 || '%'))
        "#,
    )
    .bind(&auth.email)
    .bind(from_date)
    .bind(status.map(|s| s as i16))
    .bind(patient_name)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    let rows: Vec<ListingRow> = sqlx::query_as::<_, ListingRow>(
        r#"
        SELECT
          a.appointment_id,
          a.appointment_datetime,
          a.status,
          p.patient_id,
          p.first_name AS p_first,
          p.last_name  AS p_last,
          d.dentist_id,
          d.first_name AS d_first,
          d.last_name  AS d_last
        FROM appointment a
        JOIN dentist d   ON d.dentist_id  = a.dentist_id
        JOIN account da  ON da.account_id = d.account_id
        JOIN patient p   ON p.patient_id  = a.patient_id
        WHERE da.email = $1
          AND a.archived_at IS NULL
          AND ($2::timestamptz IS NULL OR a.appointment_datetime >= $2)
          AND ($3::smallint    IS NULL OR a.status = $3)
          AND ($4::text IS NULL
               OR lower(p.first_name || ' ' || p.last_name) LIKE lower('%' || $4 || '%'))
        ORDER BY a.appointment_datetime DESC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(&auth.email)
    .bind(from_date)
    .bind(status.map(|s| s as i16))
    .bind(patient_name)
    .bind(PAGE_SIZE)
    .bind(page * PAGE_SIZE)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let items = attach_listing_extras(&state.db, rows).await?;

    Ok(Json(ApiOk {
        data: AppointmentPage {
            items,
            page,
            page_size: PAGE_SIZE,
            total,
        },
    }))
}

/* ============================================================
   GET /appointments/slots
   ============================================================ */

pub async fn list_day_slots(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<ApiOk<SlotsData>>, ApiError> {
    let date = NaiveDate::parse_from_str(q.date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date must be YYYY-MM-DD"))?;

    let dentist_exists: bool = sqlx::query_scalar(
        r#"SELECT EXISTS (SELECT 1 FROM dentist WHERE dentist_id = $1)"#,
    )
    .bind(q.dentist_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    if !dentist_exists {
        return Err(ApiError::not_found("dentist"));
    }

    let slot_minutes = match q.treatment_id {
        Some(treatment_id) => {
            let duration: Option<i32> = sqlx::query_scalar(
                r#"SELECT default_duration_minutes FROM treatment WHERE treatment_id = $1"#,
            )
            .bind(treatment_id)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(|| ApiError::not_found("treatment"))?;
            scheduling::effective_slot_minutes(duration)
        }
        None => scheduling::DEFAULT_SLOT_MINUTES,
    };

    let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let day_end = day_start + Duration::days(1);

    // Live bookings for that dentist-day; terminal statuses free the slot.
    let busy_rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        SELECT appointment_datetime
        FROM appointment
        WHERE dentist_id = $1
          AND appointment_datetime >= $2
          AND appointment_datetime <  $3
          AND status <> ALL($4)
        "#,
    )
    .bind(q.dentist_id)
    .bind(day_start)
    .bind(day_end)
    .bind(AppointmentStatus::terminal_codes())
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let busy: HashSet<DateTime<Utc>> = busy_rows.into_iter().map(|(dt,)| dt).collect();
    let slots = scheduling::day_slots(date, slot_minutes, &busy, Utc::now());

    Ok(Json(ApiOk {
        data: SlotsData { slot_minutes, slots },
    }))
}

/* ============================================================
   POST /patient/appointments (create booking)
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct BookingTreatmentRow {
    treatment_id: Uuid,
    default_price_cents: i64,
    default_duration_minutes: Option<i32>,
    is_active: bool,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    ensure_patient(&auth)?;

    let appointment_at = parse_iso_datetime(&req.appointment_datetime).ok_or_else(|| {
        ApiError::validation("appointment_datetime must be an ISO datetime (YYYY-MM-DDTHH:MM)")
    })?;

    let patient_id: Uuid = sqlx::query_scalar(
        r#"
        SELECT p.patient_id
        FROM patient p
        JOIN account a ON a.account_id = p.account_id
        WHERE a.email = $1
        "#,
    )
    .bind(&auth.email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("patient profile"))?;

    // The clinic on the appointment is always the dentist's clinic.
    let (dentist_id, clinic_id): (Uuid, Uuid) = sqlx::query_as(
        r#"SELECT dentist_id, clinic_id FROM dentist WHERE dentist_id = $1"#,
    )
    .bind(req.dentist_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("dentist"))?;

    let treatment: BookingTreatmentRow = sqlx::query_as::<_, BookingTreatmentRow>(
        r#"
        SELECT treatment_id, default_price_cents, default_duration_minutes, is_active
        FROM treatment
        WHERE treatment_id = $1
        "#,
    )
    .bind(req.treatment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("treatment"))?;

    if !treatment.is_active {
        return Err(ApiError::validation("this treatment is no longer offered"));
    }

    let slot_minutes = scheduling::effective_slot_minutes(treatment.default_duration_minutes);
    scheduling::validate_start(appointment_at, slot_minutes, Utc::now())?;

    // Fast-path conflict check; the partial unique index on
    // (dentist_id, appointment_datetime) is the real arbiter below.
    let occupied: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1 FROM appointment
          WHERE dentist_id = $1
            AND appointment_datetime = $2
            AND status <> ALL($3)
        )
        "#,
    )
    .bind(dentist_id)
    .bind(appointment_at)
    .bind(AppointmentStatus::terminal_codes())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    if occupied {
        return Err(ApiError::schedule_conflict());
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment (patient_id, dentist_id, clinic_id, appointment_datetime, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING appointment_id
        "#,
    )
    .bind(patient_id)
    .bind(dentist_id)
    .bind(clinic_id)
    .bind(appointment_at)
    .bind(AppointmentStatus::Scheduled as i16)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::schedule_conflict(),
        _ => ApiError::db(e),
    })?;

    // Price snapshot: catalog changes never alter historical bookings.
    let quantity: i32 = 1;
    let unit_price_cents = treatment.default_price_cents;
    sqlx::query(
        r#"
        INSERT INTO appointment_treatment
            (appointment_id, treatment_id, quantity, unit_price_cents, total_price_cents)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(appointment_id)
    .bind(treatment.treatment_id)
    .bind(quantity)
    .bind(unit_price_cents)
    .bind(unit_price_cents * quantity as i64)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%appointment_id, %dentist_id, "appointment booked");

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct DetailRow {
    appointment_id: Uuid,
    appointment_datetime: DateTime<Utc>,
    status: AppointmentStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
    patient_id: Uuid,
    p_first: String,
    p_last: String,
    patient_email: Option<String>,
    dentist_id: Uuid,
    d_first: String,
    d_last: String,
    dentist_email: Option<String>,
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    let row: DetailRow = sqlx::query_as::<_, DetailRow>(
        r#"
        SELECT
          a.appointment_id,
          a.appointment_datetime,
          a.status,
          a.notes,
          a.created_at,
          a.archived_at,
          p.patient_id,
          p.first_name AS p_first,
          p.last_name  AS p_last,
          pa.email     AS patient_email,
          d.dentist_id,
          d.first_name AS d_first,
          d.last_name  AS d_last,
          da.email     AS dentist_email
        FROM appointment a
        JOIN patient p   ON p.patient_id  = a.patient_id
        LEFT JOIN account pa ON pa.account_id = p.account_id
        JOIN dentist d   ON d.dentist_id  = a.dentist_id
        LEFT JOIN account da ON da.account_id = d.account_id
        WHERE a.appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("appointment"))?;

    // Either side of the appointment may view it.
    let owner = if is_dentist(&auth) {
        row.dentist_email.as_deref()
    } else {
        row.patient_email.as_deref()
    };
    ensure_owner(&auth.email, owner)?;

    let treatments: Vec<LineItemDto> = sqlx::query_as::<_, (Uuid, String, i32, i64, i64)>(
        r#"
        SELECT at.treatment_id, t.name, at.quantity, at.unit_price_cents, at.total_price_cents
        FROM appointment_treatment at
        JOIN treatment t ON t.treatment_id = at.treatment_id
        WHERE at.appointment_id = $1
        ORDER BY t.name ASC
        "#,
    )
    .bind(appointment_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?
    .into_iter()
    .map(|(treatment_id, name, quantity, unit_price_cents, total_price_cents)| LineItemDto {
        treatment_id,
        name,
        quantity,
        unit_price_cents,
        total_price_cents,
    })
    .collect();

    let invoice: Option<InvoiceBrief> = sqlx::query_as::<_, (Uuid, InvoiceStatus)>(
        r#"SELECT invoice_id, status FROM invoice WHERE appointment_id = $1"#,
    )
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .map(|(invoice_id, status)| InvoiceBrief { invoice_id, status });

    Ok(Json(ApiOk {
        data: AppointmentDetail {
            appointment_id: row.appointment_id,
            appointment_datetime: row.appointment_datetime,
            status: row.status,
            notes: row.notes,
            created_at: row.created_at,
            archived_at: row.archived_at,
            patient: PersonBrief {
                id: row.patient_id,
                display: format!("{} {}", row.p_first, row.p_last),
            },
            dentist: PersonBrief {
                id: row.dentist_id,
                display: format!("{} {}", row.d_first, row.d_last),
            },
            treatments,
            invoice,
        },
    }))
}

/* ============================================================
   Patient transitions
   ============================================================ */

pub async fn confirm_attendance(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    ensure_patient(&auth)?;

    let row = load_owned(&state.db, appointment_id).await?;
    ensure_owner(&auth.email, row.patient_email.as_deref())?;

    lifecycle::check_confirm_window(row.appointment_datetime, Utc::now())?;
    let next = lifecycle::next_status(row.status, Action::ConfirmAttendance)?;
    apply_transition(&state.db, appointment_id, row.status, next).await?;

    get_appointment(State(state), auth, Path(appointment_id)).await
}

pub async fn patient_cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    ensure_patient(&auth)?;

    let row = load_owned(&state.db, appointment_id).await?;
    ensure_owner(&auth.email, row.patient_email.as_deref())?;

    lifecycle::check_not_past(row.appointment_datetime, Utc::now())?;
    let next = lifecycle::next_status(row.status, Action::CancelOwn)?;
    apply_transition(&state.db, appointment_id, row.status, next).await?;

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/* ============================================================
   Dentist transitions
   ============================================================ */

pub async fn dentist_confirm(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    ensure_dentist(&auth)?;

    let row = load_owned(&state.db, appointment_id).await?;
    ensure_owner(&auth.email, row.dentist_email.as_deref())?;

    let next = lifecycle::next_status(row.status, Action::Confirm)?;
    apply_transition(&state.db, appointment_id, row.status, next).await?;

    get_appointment(State(state), auth, Path(appointment_id)).await
}

pub async fn dentist_cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    ensure_dentist(&auth)?;

    let row = load_owned(&state.db, appointment_id).await?;
    ensure_owner(&auth.email, row.dentist_email.as_deref())?;

    let next = lifecycle::next_status(row.status, Action::Cancel)?;
    apply_transition(&state.db, appointment_id, row.status, next).await?;

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/// Completion also seeds billing: the invoice is created from the line-item
/// totals if none exists yet. `ON CONFLICT DO NOTHING` on the one-invoice-
/// per-appointment index keeps this idempotent.
pub async fn dentist_complete(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    ensure_dentist(&auth)?;

    let row = load_owned(&state.db, appointment_id).await?;
    ensure_owner(&auth.email, row.dentist_email.as_deref())?;

    let next = lifecycle::next_status(row.status, Action::Complete)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET status = $3
        WHERE appointment_id = $1
          AND status = $2
        "#,
    )
    .bind(appointment_id)
    .bind(row.status as i16)
    .bind(next as i16)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "INVALID_STATE",
            "appointment status changed concurrently; reload and retry".into(),
        ));
    }

    let due_date = Utc::now().date_naive() + Duration::days(30);
    sqlx::query(
        r#"
        INSERT INTO invoice
            (appointment_id, total_amount_cents, discount_amount_cents, final_amount_cents, status, due_date)
        SELECT $1, COALESCE(SUM(total_price_cents), 0), 0, COALESCE(SUM(total_price_cents), 0), $2, $3
        FROM appointment_treatment
        WHERE appointment_id = $1
        ON CONFLICT (appointment_id) DO NOTHING
        "#,
    )
    .bind(appointment_id)
    .bind(InvoiceStatus::Unpaid as i16)
    .bind(due_date)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/* ============================================================
   Archival (both roles)
   ============================================================ */

async fn archive_common(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
) -> Result<ArchiveOutcome, ApiError> {
    let row = load_owned(&state.db, appointment_id).await?;

    let owner = if is_dentist(auth) {
        row.dentist_email.as_deref()
    } else {
        row.patient_email.as_deref()
    };
    ensure_owner(&auth.email, owner)?;

    if row.archived_at.is_some() {
        return Ok(ArchiveOutcome {
            archived: true,
            reason: None,
        });
    }

    if !row.status.is_terminal() {
        return Err(ApiError::invalid_state("active appointments cannot be archived"));
    }

    // An outstanding invoice blocks archival, but as a reported outcome
    // rather than a request failure.
    let invoice_status: Option<InvoiceStatus> = sqlx::query_scalar(
        r#"SELECT status FROM invoice WHERE appointment_id = $1"#,
    )
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    if invoice_status.is_some_and(|s| s.blocks_archival()) {
        return Ok(ArchiveOutcome {
            archived: false,
            reason: Some("UNPAID_INVOICE"),
        });
    }

    sqlx::query(
        r#"
        UPDATE appointment
        SET archived_at = now()
        WHERE appointment_id = $1
          AND status = $2
          AND archived_at IS NULL
        "#,
    )
    .bind(appointment_id)
    .bind(row.status as i16)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(ArchiveOutcome {
        archived: true,
        reason: None,
    })
}

pub async fn patient_archive(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<ArchiveOutcome>>, ApiError> {
    ensure_patient(&auth)?;
    let outcome = archive_common(&state, &auth, appointment_id).await?;
    Ok(Json(ApiOk { data: outcome }))
}

pub async fn dentist_archive(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<ArchiveOutcome>>, ApiError> {
    ensure_dentist(&auth)?;
    let outcome = archive_common(&state, &auth, appointment_id).await?;
    Ok(Json(ApiOk { data: outcome }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_datetime_parsing() {
        assert!(parse_iso_datetime("2031-03-10T09:30").is_some());
        assert!(parse_iso_datetime("2031-03-10T09:30:00").is_some());
        assert!(parse_iso_datetime(" 2031-03-10T09:30 ").is_some());
        assert!(parse_iso_datetime("2031-03-10 09:30").is_none());
        assert!(parse_iso_datetime("10/03/2031 09:30").is_none());
        assert!(parse_iso_datetime("").is_none());
    }

    #[test]
    fn status_param_parsing() {
        assert_eq!(parse_status_param(None).unwrap(), None);
        assert_eq!(parse_status_param(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_status_param(Some("scheduled")).unwrap(),
            Some(AppointmentStatus::Scheduled)
        );
        assert!(parse_status_param(Some("BOGUS")).is_err());
    }
}
