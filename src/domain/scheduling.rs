//! Slot availability for a dentist's day.
//!
//! Slot identity is the exact start instant: all bookings for a given
//! duration occupy aligned, non-overlapping grid cells, so collision is set
//! membership rather than interval overlap. Availability is recomputed on
//! every request; it changes with every booking.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use thiserror::Error;

/// Fallback when a treatment carries no usable duration.
pub const DEFAULT_SLOT_MINUTES: u32 = 30;

/// Clinic working window, expressed as minutes of day (09:00-17:00).
pub const OPENING_MINUTE: u32 = 9 * 60;
pub const CLOSING_MINUTE: u32 = 17 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("appointments can only be booked for a future date/time")]
    NotInFuture,
    #[error("the start time must fall on the {slot_minutes}-minute slot grid")]
    MisalignedSlot { slot_minutes: u32 },
    #[error("start times for this treatment are limited to 09:00-{:02}:{:02}", .latest / 60, .latest % 60)]
    OutsideHours { latest: u32 },
}

/// A treatment's slot length; non-positive or missing durations fall back
/// to the clinic default.
pub fn effective_slot_minutes(default_duration_minutes: Option<i32>) -> u32 {
    match default_duration_minutes {
        Some(d) if d > 0 => d as u32,
        _ => DEFAULT_SLOT_MINUTES,
    }
}

/// Latest permissible start: the slot must end by closing time.
pub fn latest_start_minute(slot_minutes: u32) -> u32 {
    CLOSING_MINUTE.saturating_sub(slot_minutes)
}

/// Validate a requested booking start against the clock, the slot grid and
/// the working window. Grid alignment is minutes-of-day modulo the slot.
pub fn validate_start(
    start: DateTime<Utc>,
    slot_minutes: u32,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if start <= now {
        return Err(BookingError::NotInFuture);
    }

    let minute_of_day = start.hour() * 60 + start.minute();
    if start.second() != 0 || minute_of_day % slot_minutes != 0 {
        return Err(BookingError::MisalignedSlot { slot_minutes });
    }

    let latest = latest_start_minute(slot_minutes);
    if minute_of_day < OPENING_MINUTE || minute_of_day > latest {
        return Err(BookingError::OutsideHours { latest });
    }

    Ok(())
}

/// All bookable start instants for one dentist-day.
///
/// Grid from opening time up to (and including) the latest start, stepping
/// by `slot_minutes`; minus starts already taken (`busy`), minus starts at
/// or before `now`. Ordered ascending.
pub fn day_slots(
    date: NaiveDate,
    slot_minutes: u32,
    busy: &HashSet<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    if slot_minutes == 0 || slot_minutes > CLOSING_MINUTE - OPENING_MINUTE {
        return Vec::new();
    }

    let latest = latest_start_minute(slot_minutes);
    let mut slots = Vec::new();
    let mut minute = OPENING_MINUTE;
    while minute <= latest {
        let start = date
            .and_hms_opt(minute / 60, minute % 60, 0)
            .unwrap()
            .and_utc();
        if start > now && !busy.contains(&start) {
            slots.push(start);
        }
        minute += slot_minutes;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(date: &str, h: u32, m: u32) -> DateTime<Utc> {
        let d: NaiveDate = date.parse().unwrap();
        Utc.from_utc_datetime(&d.and_hms_opt(h, m, 0).unwrap())
    }

    #[test]
    fn fallback_slot_duration() {
        assert_eq!(effective_slot_minutes(Some(45)), 45);
        assert_eq!(effective_slot_minutes(Some(0)), DEFAULT_SLOT_MINUTES);
        assert_eq!(effective_slot_minutes(Some(-10)), DEFAULT_SLOT_MINUTES);
        assert_eq!(effective_slot_minutes(None), DEFAULT_SLOT_MINUTES);
    }

    #[test]
    fn latest_start_for_30_minute_slot_is_1630() {
        assert_eq!(latest_start_minute(30), 16 * 60 + 30);
    }

    #[test]
    fn start_validation_for_30_minute_grid() {
        let now = at("2031-03-10", 8, 0);

        // 16:30 is the last bookable start
        assert_eq!(validate_start(at("2031-03-10", 16, 30), 30, now), Ok(()));
        // 16:45 is past the latest start (and off the 09:00 grid)
        assert!(validate_start(at("2031-03-10", 16, 45), 30, now).is_err());
        // 16:31 is off the grid
        assert_eq!(
            validate_start(at("2031-03-10", 16, 31), 30, now),
            Err(BookingError::MisalignedSlot { slot_minutes: 30 })
        );
        // 17:00 is aligned but outside the window
        assert_eq!(
            validate_start(at("2031-03-10", 17, 0), 30, now),
            Err(BookingError::OutsideHours { latest: 990 })
        );
        // 08:30 is aligned but before opening
        assert_eq!(
            validate_start(at("2031-03-10", 8, 30), 30, now),
            Err(BookingError::OutsideHours { latest: 990 })
        );
        // booking in the past
        assert_eq!(
            validate_start(at("2031-03-10", 7, 30), 30, now),
            Err(BookingError::NotInFuture)
        );
    }

    #[test]
    fn day_grid_is_ordered_and_complete() {
        let date: NaiveDate = "2031-03-10".parse().unwrap();
        let now = at("2031-03-09", 12, 0);
        let slots = day_slots(date, 30, &HashSet::new(), now);

        // 09:00 .. 16:30 inclusive, every 30 minutes
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0], at("2031-03-10", 9, 0));
        assert_eq!(slots[15], at("2031-03-10", 16, 30));
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn busy_starts_are_removed() {
        let date: NaiveDate = "2031-03-10".parse().unwrap();
        let now = at("2031-03-09", 12, 0);
        let busy: HashSet<_> = [at("2031-03-10", 10, 0), at("2031-03-10", 14, 30)]
            .into_iter()
            .collect();

        let slots = day_slots(date, 30, &busy, now);
        assert_eq!(slots.len(), 14);
        assert!(!slots.contains(&at("2031-03-10", 10, 0)));
        assert!(!slots.contains(&at("2031-03-10", 14, 30)));
    }

    #[test]
    fn same_day_past_slots_are_removed() {
        let date: NaiveDate = "2031-03-10".parse().unwrap();
        // mid-day: 13:00 exactly. Slots at or before now are gone.
        let now = at("2031-03-10", 13, 0);
        let slots = day_slots(date, 30, &HashSet::new(), now);

        assert_eq!(slots[0], at("2031-03-10", 13, 30));
        assert_eq!(slots.last().copied(), Some(at("2031-03-10", 16, 30)));
    }

    #[test]
    fn sixty_minute_grid() {
        let date: NaiveDate = "2031-03-10".parse().unwrap();
        let now = at("2031-03-09", 12, 0);
        let slots = day_slots(date, 60, &HashSet::new(), now);

        assert_eq!(slots.len(), 8); // 09:00 .. 16:00
        assert_eq!(slots.last().copied(), Some(at("2031-03-10", 16, 0)));
    }
}
