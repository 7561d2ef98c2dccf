use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
}

/* -------------------------
   Roles
--------------------------*/

/// Role mapping for account.role:
/// 0 Patient, 1 Dentist
pub const ROLE_PATIENT: i16 = 0;
pub const ROLE_DENTIST: i16 = 1;

pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "patient",
        1 => "dentist",
        _ => "unknown",
    }
    .to_string()
}

/* -------------------------
   Status enums

   Stored as smallint in DB, exchanged with clients by name
   ("SCHEDULED", "PARTIALLY_PAID", ...).
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum AppointmentStatus {
    Scheduled = 0,
    Confirmed = 1,
    PatientConfirmed = 2,
    Completed = 3,
    Cancelled = 4,
    Expired = 5,
}

impl AppointmentStatus {
    /// Terminal statuses: no further transition is permitted, and these are
    /// exactly the statuses that do not occupy a slot in the calendar.
    pub const TERMINAL: [AppointmentStatus; 3] = [
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Expired,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Smallint codes of the terminal statuses, for `status <> ALL($n)` binds.
    pub fn terminal_codes() -> Vec<i16> {
        Self::TERMINAL.iter().map(|s| *s as i16).collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::PatientConfirmed => "PATIENT_CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "SCHEDULED" => Some(AppointmentStatus::Scheduled),
            "CONFIRMED" => Some(AppointmentStatus::Confirmed),
            "PATIENT_CONFIRMED" => Some(AppointmentStatus::PatientConfirmed),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            "EXPIRED" => Some(AppointmentStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum InvoiceStatus {
    Unpaid = 0,
    PartiallyPaid = 1,
    Paid = 2,
    Cancelled = 3,
}

impl InvoiceStatus {
    /// An outstanding invoice blocks archival of its appointment.
    pub fn blocks_archival(self) -> bool {
        matches!(self, InvoiceStatus::Unpaid | InvoiceStatus::PartiallyPaid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PaymentMethod {
    Cash = 0,
    Card = 1,
}

impl PaymentMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "CASH" => Some(PaymentMethod::Cash),
            "CARD" => Some(PaymentMethod::Card),
            _ => None,
        }
    }
}

/* -------------------------
   API envelope
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

/* -------------------------
   Auth DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub account: AccountProfile,
}

#[derive(Debug, Serialize)]
pub struct AccountProfile {
    pub account_id: Uuid,
    pub email: String,
    pub role: String,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct AccountRow {
    pub account_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TreatmentRow {
    pub treatment_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub default_price_cents: i64,
    pub default_duration_minutes: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DentistRow {
    pub dentist_id: Uuid,
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub specialty: Option<String>,
    pub clinic_name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: String,
    pub transaction_no: Option<String>,
    pub payment_datetime: DateTime<Utc>,
}

/* -------------------------
   Money formatting
--------------------------*/

/// Render integer cents as a "1234.56" decimal string for responses.
pub fn cents_to_string(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_round_trip() {
        for s in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Confirmed,
            AppointmentStatus::PatientConfirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Expired,
        ] {
            assert_eq!(AppointmentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(AppointmentStatus::parse("scheduled"), Some(AppointmentStatus::Scheduled));
        assert_eq!(AppointmentStatus::parse("NOPE"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(AppointmentStatus::Completed.is_terminal());
        assert!(AppointmentStatus::Cancelled.is_terminal());
        assert!(AppointmentStatus::Expired.is_terminal());
        assert!(!AppointmentStatus::Scheduled.is_terminal());
        assert!(!AppointmentStatus::Confirmed.is_terminal());
        assert!(!AppointmentStatus::PatientConfirmed.is_terminal());
    }

    #[test]
    fn cents_formatting() {
        assert_eq!(cents_to_string(0), "0.00");
        assert_eq!(cents_to_string(5), "0.05");
        assert_eq!(cents_to_string(10000), "100.00");
        assert_eq!(cents_to_string(-1250), "-12.50");
    }
}
