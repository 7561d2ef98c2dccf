//! Appointment status state machine.
//!
//! All transition rules live in one table (`next_status`) so they can be
//! tested without persistence. Time-window rules that need the current
//! instant are separate checks invoked by the route layer before the table.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::models::AppointmentStatus;

/// Attendance can be confirmed by the patient starting exactly this many
/// hours before the appointment.
pub const PATIENT_CONFIRM_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Dentist acknowledges the booking.
    Confirm,
    /// Patient confirms they will attend.
    ConfirmAttendance,
    /// Dentist cancels.
    Cancel,
    /// Patient cancels their own booking.
    CancelOwn,
    /// Dentist marks the visit as done.
    Complete,
    /// System sweep for appointments whose time has passed.
    Expire,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("operation not permitted while the appointment is {}", .from.as_str())]
    NotAllowed {
        from: AppointmentStatus,
        action: Action,
    },
    #[error("the appointment date/time has already passed")]
    AppointmentPast,
    #[error("the appointment is more than {PATIENT_CONFIRM_WINDOW_HOURS} hours away; attendance cannot be confirmed yet")]
    ConfirmWindowNotOpen,
}

/// The transition table: (current status, action) -> next status.
///
/// Terminal statuses (COMPLETED, CANCELLED, EXPIRED) admit no action at all;
/// only archival is possible afterwards, and that is not a status change.
pub fn next_status(
    current: AppointmentStatus,
    action: Action,
) -> Result<AppointmentStatus, TransitionError> {
    use AppointmentStatus::*;

    match (current, action) {
        (Scheduled, Action::Confirm) => Ok(Confirmed),
        (Scheduled | Confirmed, Action::ConfirmAttendance) => Ok(PatientConfirmed),
        (Scheduled | Confirmed | PatientConfirmed, Action::Cancel) => Ok(Cancelled),
        (Scheduled | PatientConfirmed, Action::CancelOwn) => Ok(Cancelled),
        (Confirmed | PatientConfirmed, Action::Complete) => Ok(Completed),
        (Scheduled | Confirmed | PatientConfirmed, Action::Expire) => Ok(Expired),
        (from, action) => Err(TransitionError::NotAllowed { from, action }),
    }
}

/// Patient-side actions only apply to appointments that have not happened yet.
pub fn check_not_past(
    appointment_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if appointment_at < now {
        return Err(TransitionError::AppointmentPast);
    }
    Ok(())
}

/// Attendance confirmation opens exactly 24 hours before the appointment
/// and closes when the appointment time passes.
pub fn check_confirm_window(
    appointment_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    check_not_past(appointment_at, now)?;
    if appointment_at > now + Duration::hours(PATIENT_CONFIRM_WINDOW_HOURS) {
        return Err(TransitionError::ConfirmWindowNotOpen);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    const ALL_ACTIONS: [Action; 6] = [
        Action::Confirm,
        Action::ConfirmAttendance,
        Action::Cancel,
        Action::CancelOwn,
        Action::Complete,
        Action::Expire,
    ];

    #[test]
    fn terminal_statuses_are_fixed_points() {
        for terminal in [Completed, Cancelled, Expired] {
            for action in ALL_ACTIONS {
                assert!(
                    next_status(terminal, action).is_err(),
                    "{terminal:?} must reject {action:?}"
                );
            }
        }
    }

    #[test]
    fn dentist_confirm_only_from_scheduled() {
        assert_eq!(next_status(Scheduled, Action::Confirm), Ok(Confirmed));
        assert!(next_status(Confirmed, Action::Confirm).is_err());
        assert!(next_status(PatientConfirmed, Action::Confirm).is_err());
    }

    #[test]
    fn patient_confirm_from_scheduled_or_confirmed() {
        assert_eq!(next_status(Scheduled, Action::ConfirmAttendance), Ok(PatientConfirmed));
        assert_eq!(next_status(Confirmed, Action::ConfirmAttendance), Ok(PatientConfirmed));
        assert!(next_status(PatientConfirmed, Action::ConfirmAttendance).is_err());
    }

    #[test]
    fn complete_requires_a_confirmation() {
        assert_eq!(next_status(Confirmed, Action::Complete), Ok(Completed));
        assert_eq!(next_status(PatientConfirmed, Action::Complete), Ok(Completed));
        assert!(next_status(Scheduled, Action::Complete).is_err());
    }

    #[test]
    fn cancel_rules_differ_by_actor() {
        // dentist may cancel from any non-terminal state
        for s in [Scheduled, Confirmed, PatientConfirmed] {
            assert_eq!(next_status(s, Action::Cancel), Ok(Cancelled));
        }
        // patient cannot cancel a dentist-confirmed appointment
        assert_eq!(next_status(Scheduled, Action::CancelOwn), Ok(Cancelled));
        assert_eq!(next_status(PatientConfirmed, Action::CancelOwn), Ok(Cancelled));
        assert!(next_status(Confirmed, Action::CancelOwn).is_err());
    }

    #[test]
    fn expire_covers_every_non_terminal_status() {
        for s in [Scheduled, Confirmed, PatientConfirmed] {
            assert_eq!(next_status(s, Action::Expire), Ok(Expired));
        }
    }

    #[test]
    fn confirm_window_opens_24_hours_before() {
        let now = Utc::now();

        // 30 hours out: too early
        assert_eq!(
            check_confirm_window(now + Duration::hours(30), now),
            Err(TransitionError::ConfirmWindowNotOpen)
        );
        // 10 hours out: fine
        assert_eq!(check_confirm_window(now + Duration::hours(10), now), Ok(()));
        // already passed
        assert_eq!(
            check_confirm_window(now - Duration::minutes(1), now),
            Err(TransitionError::AppointmentPast)
        );
    }
}
