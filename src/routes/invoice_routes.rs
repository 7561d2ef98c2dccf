// src/routes/invoice_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::billing::{self, CardDetails, PaymentDecline},
    domain::ownership::ensure_owner,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        cents_to_string, ApiOk, AppState, InvoiceStatus, PaymentMethod, PaymentRow,
        ROLE_DENTIST, ROLE_PATIENT,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patient/invoices/{invoice_id}", get(patient_view_invoice))
        .route("/patient/invoices/{invoice_id}/pay", post(pay_invoice))
        .route("/dentist/invoices/{invoice_id}", get(dentist_view_invoice))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct InvoiceView {
    pub invoice_id: Uuid,
    pub appointment_id: Uuid,
    pub total_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub final_amount_cents: i64,
    pub final_amount: String,
    pub status: InvoiceStatus,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub payments: Vec<PaymentRow>,
    pub paid_total_cents: i64,
    pub paid_total: String,
    pub remaining_cents: i64,
    pub remaining: String,
    pub overdue: bool,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    /// Decimal string; both '.' and ',' are accepted as separator.
    pub amount: Option<String>,
    /// "CASH" (default) or "CARD"
    pub method: Option<String>,
    pub card_number: Option<String>,
    pub exp: Option<String>,
    pub cvv: Option<String>,
    pub brand: Option<String>,
}

/// Payment attempts never hard-fail on policy grounds: a decline carries a
/// reason code plus the current ledger state so the caller can adjust.
#[derive(Debug, Serialize)]
pub struct PaymentOutcome {
    pub accepted: bool,
    pub reason: Option<&'static str>,
    pub transaction_no: Option<String>,
    pub invoice_status: InvoiceStatus,
    pub paid_total_cents: i64,
    pub remaining_cents: i64,
}

/* ============================================================
   Shared loading
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct OwnedInvoiceRow {
    invoice_id: Uuid,
    appointment_id: Uuid,
    total_amount_cents: i64,
    discount_amount_cents: i64,
    final_amount_cents: i64,
    status: InvoiceStatus,
    due_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    patient_email: Option<String>,
    dentist_email: Option<String>,
}

async fn load_owned(db: &sqlx::PgPool, invoice_id: Uuid) -> Result<OwnedInvoiceRow, ApiError> {
    sqlx::query_as::<_, OwnedInvoiceRow>(
        r#"
        SELECT
          i.invoice_id,
          i.appointment_id,
          i.total_amount_cents,
          i.discount_amount_cents,
          i.final_amount_cents,
          i.status,
          i.due_date,
          i.created_at,
          pa.email AS patient_email,
          da.email AS dentist_email
        FROM invoice i
        JOIN appointment a ON a.appointment_id = i.appointment_id
        LEFT JOIN patient p  ON p.patient_id  = a.patient_id
        LEFT JOIN account pa ON pa.account_id = p.account_id
        LEFT JOIN dentist d  ON d.dentist_id  = a.dentist_id
        LEFT JOIN account da ON da.account_id = d.account_id
        WHERE i.invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .fetch_optional(db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("invoice"))
}

async fn paid_total(
    tx: &mut sqlx::PgConnection,
    invoice_id: Uuid,
) -> Result<i64, ApiError> {
    sqlx::query_scalar(
        r#"SELECT COALESCE(SUM(amount_cents), 0) FROM payment WHERE invoice_id = $1"#,
    )
    .bind(invoice_id)
    .fetch_one(tx)
    .await
    .map_err(ApiError::db)
}

/* ============================================================
   Invoice views
   ============================================================ */

/// Builds the view and persists the re-derived status when it drifted from
/// the payment ledger. Recomputation is an explicit step here, on every
/// read, never a hidden rendering side effect.
async fn build_invoice_view(
    state: &AppState,
    row: OwnedInvoiceRow,
) -> Result<InvoiceView, ApiError> {
    let payments: Vec<PaymentRow> = sqlx::query_as::<_, PaymentRow>(
        r#"
        SELECT payment_id, invoice_id, amount_cents, payment_method, payment_status,
               transaction_no, payment_datetime
        FROM payment
        WHERE invoice_id = $1
        ORDER BY payment_datetime DESC
        "#,
    )
    .bind(row.invoice_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let paid: i64 = payments.iter().map(|p| p.amount_cents).sum();
    let remaining = billing::remaining_cents(row.final_amount_cents, paid);

    let today = Utc::now().date_naive();
    let overdue = billing::is_overdue(row.due_date, remaining, row.status, today);

    let derived = billing::derive_invoice_status(row.status, paid, row.final_amount_cents);
    if derived != row.status {
        sqlx::query(r#"UPDATE invoice SET status = $2 WHERE invoice_id = $1"#)
            .bind(row.invoice_id)
            .bind(derived as i16)
            .execute(&state.db)
            .await
            .map_err(ApiError::db)?;
    }

    Ok(InvoiceView {
        invoice_id: row.invoice_id,
        appointment_id: row.appointment_id,
        total_amount_cents: row.total_amount_cents,
        discount_amount_cents: row.discount_amount_cents,
        final_amount_cents: row.final_amount_cents,
        final_amount: cents_to_string(row.final_amount_cents),
        status: derived,
        due_date: row.due_date,
        created_at: row.created_at,
        payments,
        paid_total_cents: paid,
        paid_total: cents_to_string(paid),
        remaining_cents: remaining,
        remaining: cents_to_string(remaining),
        overdue,
    })
}

pub async fn patient_view_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ApiOk<InvoiceView>>, ApiError> {
    if auth.role != ROLE_PATIENT {
        return Err(ApiError::not_owner());
    }

    let row = load_owned(&state.db, invoice_id).await?;
    ensure_owner(&auth.email, row.patient_email.as_deref())?;

    let view = build_invoice_view(&state, row).await?;
    Ok(Json(ApiOk { data: view }))
}

pub async fn dentist_view_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ApiOk<InvoiceView>>, ApiError> {
    if auth.role != ROLE_DENTIST {
        return Err(ApiError::not_owner());
    }

    let row = load_owned(&state.db, invoice_id).await?;
    ensure_owner(&auth.email, row.dentist_email.as_deref())?;

    let view = build_invoice_view(&state, row).await?;
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   POST /patient/invoices/{id}/pay
   ============================================================ */

fn declined(
    decline: &PaymentDecline,
    status: InvoiceStatus,
    paid: i64,
    final_cents: i64,
) -> PaymentOutcome {
    PaymentOutcome {
        accepted: false,
        reason: Some(decline.code()),
        transaction_no: None,
        invoice_status: status,
        paid_total_cents: paid,
        remaining_cents: billing::remaining_cents(final_cents, paid),
    }
}

pub async fn pay_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<PayRequest>,
) -> Result<Json<ApiOk<PaymentOutcome>>, ApiError> {
    if auth.role != ROLE_PATIENT {
        return Err(ApiError::not_owner());
    }

    let owned = load_owned(&state.db, invoice_id).await?;
    ensure_owner(&auth.email, owned.patient_email.as_deref())?;

    let method = match req.method.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => PaymentMethod::Cash,
        Some(raw) => PaymentMethod::parse(raw)
            .ok_or_else(|| ApiError::validation(format!("unknown payment method: {raw}")))?,
    };

    // Lock the invoice row for the whole check-then-append sequence so two
    // concurrent payments cannot both pass the balance check.
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let (status, final_cents): (InvoiceStatus, i64) = sqlx::query_as(
        r#"SELECT status, final_amount_cents FROM invoice WHERE invoice_id = $1 FOR UPDATE"#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if status == InvoiceStatus::Cancelled {
        return Err(ApiError::invalid_state("payments cannot be made to a cancelled invoice"));
    }

    let paid = paid_total(&mut *tx, invoice_id).await?;

    let amount_cents = req
        .amount
        .as_deref()
        .and_then(billing::parse_amount_cents)
        .filter(|cents| *cents > 0);

    let Some(amount_cents) = amount_cents else {
        tx.rollback().await.map_err(ApiError::db)?;
        return Ok(Json(ApiOk {
            data: declined(&PaymentDecline::Amount, status, paid, final_cents),
        }));
    };

    let remaining = billing::remaining_cents(final_cents, paid);
    if let Err(decline) = billing::check_against_balance(amount_cents, remaining) {
        // A settled invoice still gets its status re-derived, mirroring the
        // lazy recomputation done on reads.
        if decline == PaymentDecline::AlreadySettled {
            let derived = billing::derive_invoice_status(status, paid, final_cents);
            sqlx::query(r#"UPDATE invoice SET status = $2 WHERE invoice_id = $1"#)
                .bind(invoice_id)
                .bind(derived as i16)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::db)?;
            tx.commit().await.map_err(ApiError::db)?;
            return Ok(Json(ApiOk {
                data: declined(&decline, derived, paid, final_cents),
            }));
        }
        tx.rollback().await.map_err(ApiError::db)?;
        return Ok(Json(ApiOk {
            data: declined(&decline, status, paid, final_cents),
        }));
    }

    if method == PaymentMethod::Card {
        let card = CardDetails {
            number: req.card_number,
            exp: req.exp,
            cvv: req.cvv,
            brand: req.brand,
        };
        if let Err(decline) = billing::validate_card(&card) {
            tx.rollback().await.map_err(ApiError::db)?;
            return Ok(Json(ApiOk {
                data: declined(&decline, status, paid, final_cents),
            }));
        }
    }

    // Append-only ledger row; payments are never mutated or deleted.
    let transaction_no = format!("TX-{}", Uuid::new_v4());
    sqlx::query(
        r#"
        INSERT INTO payment
            (invoice_id, amount_cents, payment_method, payment_status, transaction_no)
        VALUES ($1, $2, $3, 'SUCCESS', $4)
        "#,
    )
    .bind(invoice_id)
    .bind(amount_cents)
    .bind(method as i16)
    .bind(&transaction_no)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let new_paid = paid + amount_cents;
    let derived = billing::derive_invoice_status(status, new_paid, final_cents);
    sqlx::query(r#"UPDATE invoice SET status = $2 WHERE invoice_id = $1"#)
        .bind(invoice_id)
        .bind(derived as i16)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%invoice_id, amount_cents, "payment accepted");

    Ok(Json(ApiOk {
        data: PaymentOutcome {
            accepted: true,
            reason: None,
            transaction_no: Some(transaction_no),
            invoice_status: derived,
            paid_total_cents: new_paid,
            remaining_cents: billing::remaining_cents(final_cents, new_paid),
        },
    }))
}
